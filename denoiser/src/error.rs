//! Error types for the denoiser frame orchestrator.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors that can occur while configuring or rendering frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenoiserError {
    /// The GPU backend reported an error (submission, wait, device loss).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A stage failed to initialize its resources.
    #[error("stage '{stage}' failed to initialize: {reason}")]
    StageInit { stage: String, reason: String },

    /// A stage failed while recording commands.
    #[error("stage '{stage}' failed to record: {reason}")]
    Record { stage: String, reason: String },

    /// An external stage failed to run its out-of-queue work.
    #[error("stage '{stage}' failed to dispatch: {reason}")]
    Dispatch { stage: String, reason: String },

    /// A stage was initialized without the configuration it requires.
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    /// A stage did not expose a named image output.
    #[error("stage '{stage}' has no image output named '{output}'")]
    MissingImage { stage: String, output: String },

    /// A slot index was out of range.
    #[error("index {index} is out of range (slot holds {len} candidates)")]
    InvalidIndex { index: usize, len: usize },

    /// Invalid orchestrator or registry configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The orchestrator was used after shutdown.
    #[error("orchestrator has been shut down")]
    ShutDown,
}

/// Result type for orchestrator operations.
pub type DenoiserResult<T> = Result<T, DenoiserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_is_transparent() {
        let err: DenoiserError = BackendError::DeviceLost.into();
        assert_eq!(err.to_string(), "GPU device lost");
    }

    #[test]
    fn test_stage_init_display() {
        let err = DenoiserError::StageInit {
            stage: "BMFR".into(),
            reason: "shader not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "stage 'BMFR' failed to initialize: shader not found"
        );
    }
}
