use thiserror::Error;

/// Failure modes of the ingestion pipeline. Everything here is recoverable
/// from the process's point of view; per-owner failures never leak into
/// another owner's pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The presented credential does not resolve to any current owner.
    #[error("credential does not resolve to a known owner")]
    UnknownToken,

    /// The sample failed range or shape validation and was dropped.
    #[error("sample rejected: {0}")]
    Rejected(String),

    /// A durable write (or read backing a decision) failed. Throttle state
    /// is left untouched so the next sample stays eligible.
    #[error("storage failure")]
    Storage(#[source] anyhow::Error),

    /// An outbound delivery failed. Logged by callers, never surfaced as a
    /// failure of the ingestion decision itself.
    #[error("transport failure")]
    Transport(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        PipelineError::Rejected(reason.into())
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        PipelineError::Storage(err.into())
    }

    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        PipelineError::Transport(err.into())
    }
}
