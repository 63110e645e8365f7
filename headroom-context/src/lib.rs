//! Context budgeting for LLM conversations
//!
//! Fits a conversation into a fixed token budget before each model call,
//! preserving as much semantic value as possible. Four stages run in fixed
//! order: tool-output compaction (with content-addressed externalization),
//! deterministic rule-based history compression, model-assisted digest
//! squeezing, and final hard-budget trimming.

pub mod artifact;
pub mod compactor;
pub mod counter;
pub mod digest;
pub mod error;
pub mod manager;
pub mod rules;
pub mod trimmer;
pub mod types;

pub use artifact::{ArtifactKey, ArtifactStore, MemoryArtifactStore};
pub use compactor::{classify, ContentKind, ToolOutputCompactor};
pub use counter::{clear_encoder_cache, TiktokenCounter, TokenCounter, TokenizerProfile};
pub use digest::squeeze_digest;
pub use error::ContextError;
pub use manager::ContextManager;
pub use rules::{DeterministicCompressor, SUBJECTIVE_RULES};
pub use trimmer::{fits_in_budget, trim_to_budget, usage_info, ContextUsage, TrimOutcome};
pub use types::{ContextConfig, ContextStep, ManagedConversation, PipelineStage};
