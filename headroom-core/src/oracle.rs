//! The external compression oracle boundary

use async_trait::async_trait;

use crate::conversation::Conversation;
use crate::error::OracleError;

/// A model-backed text-compression service
///
/// The pipeline uses the oracle for exactly one thing: producing a shorter
/// version of an oversized rolling digest. One synchronous completion per
/// call, no streaming, no tool calls. This is the only operation in the
/// pipeline that may block on I/O; callers wanting a deadline wrap this call
/// with their own timeout and treat a timeout as an [`OracleError`].
#[async_trait]
pub trait CompressionOracle: Send + Sync {
    /// Send a prompt conversation and get the completion text
    async fn complete(&self, prompt: &Conversation) -> Result<String, OracleError>;
}
