use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced to the user by engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error("account `{0}` is active and cannot be deleted; switch to another account first")]
    ActiveAccountProtected(String),
    #[error("account `{0}` not found")]
    UnknownAccount(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{operation} failed: {source}")]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("autostart error: {0}")]
    Autostart(String),
}

impl SyncError {
    pub(crate) fn operation(operation: &'static str) -> impl FnOnce(BackendError) -> SyncError {
        move |source| SyncError::OperationFailed { operation, source }
    }

    /// Rejected locally, before anything was sent to the backend.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_)
                | SyncError::ActiveAccountProtected(_)
                | SyncError::UnknownAccount(_)
        )
    }
}
