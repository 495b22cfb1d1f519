use std::time::Duration;

use super::launcher::LaunchStrategy;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failures of one pass through the extraction pipeline.
///
/// None of these reach the caller of the analyst: the orchestrator turns every
/// variant into a heuristic verdict or a "not available" sentinel.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to spawn external tool ({strategy}): {source}")]
    ProcessSpawnFailed {
        strategy: LaunchStrategy,
        #[source]
        source: std::io::Error,
    },

    /// The strategy cannot be used for this request (prompt too long, no shell...).
    #[error("strategy {strategy} unavailable: {reason}")]
    StrategyUnavailable {
        strategy: LaunchStrategy,
        reason: String,
    },

    #[error("external tool exited with code {code:?} and produced no output (stderr: {stderr})")]
    ProcessExitedWithError { code: Option<i32>, stderr: String },

    #[error("external tool did not complete within {0:?}")]
    ProcessTimedOut(Duration),

    #[error("no recoverable payload: {0}")]
    NoRecoverablePayload(String),

    #[error("recovered object does not match the sentiment schema: {0}")]
    InvalidSchema(String),

    #[error("stream i/o error: {0}")]
    Io(#[from] std::io::Error),
}
