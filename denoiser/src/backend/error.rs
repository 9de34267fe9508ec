//! Backend error types.

use thiserror::Error;

/// Errors that can occur in backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Failed to initialize the backend.
    #[error("backend initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a command buffer, semaphore, fence or image.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// Queue submission was rejected by the device.
    #[error("queue submission failed: {0}")]
    SubmissionFailed(String),
    /// The synchronization protocol was violated (e.g. a wait that can never be satisfied).
    #[error("synchronization validation failed: {0}")]
    Validation(String),
    /// The device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// Internal backend error.
    #[error("internal backend error: {0}")]
    Internal(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
