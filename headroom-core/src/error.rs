//! Error types for the core crate

use thiserror::Error;

/// Failure of the external compression oracle
///
/// Oracle failures are never fatal to a pipeline run: the caller recovers by
/// leaving the affected message unmodified.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OracleError {
    /// The oracle rejected the request or returned an error response
    #[error("oracle request failed: {0}")]
    RequestFailed(String),

    /// The oracle returned an empty or unusable completion
    #[error("oracle returned an empty completion")]
    EmptyCompletion,

    /// The oracle was unreachable (treat timeouts as this)
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}
