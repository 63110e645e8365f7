//! Error types for the budgeting pipeline

use headroom_core::OracleError;
use thiserror::Error;

/// Errors surfaced by the budgeting pipeline
#[derive(Error, Debug)]
pub enum ContextError {
    /// Bad call or bad configuration: empty conversation, non-positive
    /// budget, headroom outside `[0, 1)`. Always surfaced, never corrected.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Explicit tokenizer identifier not recognized at construction time
    #[error("Unknown tokenizer: {0}")]
    UnknownTokenizer(String),

    /// Encoder construction failed for a recognized profile
    #[error("Tokenizer construction failed: {0}")]
    TokenizerConstruction(String),

    /// The artifact store rejected an operation
    #[error("Artifact store error: {0}")]
    Artifact(String),

    /// The compression oracle failed; recovered locally by the digest stage
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
}
