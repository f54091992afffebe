use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure taxonomy for the suggestion pipeline.
///
/// Per-segment provider failures are absorbed by the orchestrator (the
/// segment falls back to its source text); everything else either degrades
/// retrieval or aborts the job, depending on where it surfaces.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown document/segment or malformed options. Fails fast, before a
    /// job record is created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Provider or embedding endpoint rejected our credentials.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Provider asked us to back off. Not retried within the attempt budget.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A call exceeded its upper-bound timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Transient provider/network failure, retryable within the budget.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Vectors of different dimensions were compared. Contract violation,
    /// never a silent zero score.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// No embedding generator is configured or it refused the request.
    /// Retrieval seams catch this and degrade to fuzzy-only search.
    #[error("embedding generator unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Cooperative cancellation observed at a checkpoint. Not a true error:
    /// it unwinds the processing loop and resolves the job as CANCELLED.
    #[error("job cancelled")]
    Cancelled,

    /// Durable-store write failure. The job is marked ERROR and no further
    /// writes are attempted.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// Whether the retry executor may attempt this operation again.
    /// Credential and quota failures are surfaced immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Transient(format!("connection failed: {err}"))
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineError;

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(PipelineError::Timeout("90s".into()).is_retryable());
        assert!(PipelineError::Transient("503".into()).is_retryable());

        assert!(!PipelineError::InvalidCredentials("bad key".into()).is_retryable());
        assert!(!PipelineError::RateLimited("quota".into()).is_retryable());
        assert!(!PipelineError::Validation("no such document".into()).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::Persistence("disk full".into()).is_retryable());
        assert!(!PipelineError::DimensionMismatch { expected: 768, got: 384 }.is_retryable());
    }

    #[test]
    fn display_messages() {
        let err = PipelineError::DimensionMismatch { expected: 768, got: 384 };
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: expected 768, got 384"
        );
        assert_eq!(PipelineError::Cancelled.to_string(), "job cancelled");
    }
}
