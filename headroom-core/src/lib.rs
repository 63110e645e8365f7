//! Core types and traits for the Headroom context-budgeting library
//!
//! This crate provides the conversation data model shared by every pipeline
//! stage, plus the traits for the external collaborators the pipeline talks
//! to (the compression oracle). It deliberately stays small: the budgeting
//! pipeline itself lives in `headroom-context`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod conversation;
pub mod error;
pub mod message;
pub mod oracle;

// Re-export commonly used items
pub use conversation::{Conversation, HISTORY_SUMMARY_MARKER};
pub use error::OracleError;
pub use message::{Message, Role, ToolCall};
pub use oracle::CompressionOracle;
