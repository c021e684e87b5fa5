//! Typed access to the local usage backend.

mod error;
mod http;
mod retry;

use async_trait::async_trait;

use crate::model::{Account, LimitsResponse, Provider};

pub use error::BackendError;
pub use http::HttpBackend;
pub use retry::{with_retry, with_retry_if, RetryPolicy};

/// Operations the tray client consumes from the backend.
///
/// `check_backend` is a best-effort probe and never fails. Trigger-style
/// calls (`login`, `add_account`) open an external browser flow and are
/// never retried by callers.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn check_backend(&self) -> bool;

    async fn fetch_limits(&self) -> Result<LimitsResponse, BackendError>;

    /// Asks the backend to re-query providers before the next `fetch_limits`.
    async fn refresh_limits(&self) -> Result<(), BackendError>;

    async fn get_accounts(&self, provider: Provider) -> Result<Vec<Account>, BackendError>;

    async fn activate_account(&self, account_id: &str) -> Result<(), BackendError>;

    async fn update_account_name(&self, account_id: &str, name: &str)
        -> Result<(), BackendError>;

    async fn delete_account(&self, account_id: &str) -> Result<(), BackendError>;

    async fn add_account(&self, provider: Provider) -> Result<(), BackendError>;

    async fn login(&self, provider: Provider) -> Result<(), BackendError>;

    async fn logout(&self, provider: Provider) -> Result<(), BackendError>;
}

/// Account ids are the first 8 hex characters of a UUID4.
pub fn validate_account_id(account_id: &str) -> Result<(), BackendError> {
    if account_id.len() == 8
        && account_id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        Ok(())
    } else {
        Err(BackendError::InvalidRequest(format!(
            "invalid account_id `{account_id}`: expected 8 lowercase hex characters"
        )))
    }
}
