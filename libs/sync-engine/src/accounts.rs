//! Accounts of the active provider.
//!
//! The store keeps two views. `confirmed` is the last list the backend
//! returned. `tentative` holds local edits made ahead of backend
//! confirmation and is dropped whenever an authoritative list arrives.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{validate_account_id, with_retry_if, Backend, BackendError, RetryPolicy};
use crate::error::SyncError;
use crate::events::{emit, EngineEvent, EventSender};
use crate::frontend::Frontend;
use crate::model::{Account, Provider};
use crate::poll::{poll_until, PollOutcome, PollSchedule};
use crate::tasks::spawn_background;

pub const MAX_NAME_CHARS: usize = 50;

fn is_allowed_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || c == '-'
        || c == '_'
        || ('\u{0400}'..='\u{04FF}').contains(&c)
}

/// Returns the trimmed name, or a user-facing validation error.
pub fn validate_account_name(name: &str) -> Result<String, SyncError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation("account name cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(SyncError::Validation(format!(
            "account name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    if !trimmed.chars().all(is_allowed_name_char) {
        return Err(SyncError::Validation(
            "account name may only contain letters, digits, spaces, '-' and '_'".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Clears `is_active` on every account after the first active one and
/// returns how many were cleared.
fn keep_first_active(accounts: &mut [Account]) -> usize {
    let mut seen = false;
    let mut demoted = 0;
    for account in accounts.iter_mut().filter(|account| account.is_active) {
        if seen {
            account.is_active = false;
            demoted += 1;
        }
        seen = true;
    }
    demoted
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Cancelled,
}

pub struct AccountStore {
    backend: Arc<dyn Backend>,
    events: EventSender,
    provider: Provider,
    confirmed: Vec<Account>,
    tentative: Option<Vec<Account>>,
    editing: Option<String>,
    retry: RetryPolicy,
    poll: PollSchedule,
}

impl AccountStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        events: EventSender,
        provider: Provider,
        retry: RetryPolicy,
        poll: PollSchedule,
    ) -> Self {
        Self {
            backend,
            events,
            provider,
            confirmed: Vec::new(),
            tentative: None,
            editing: None,
            retry,
            poll,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Switching provider discards every account of the previous one.
    pub fn set_provider(&mut self, provider: Provider) {
        if self.provider == provider {
            return;
        }
        self.provider = provider;
        self.confirmed.clear();
        self.tentative = None;
        self.editing = None;
    }

    /// What the UI shows: local edits if any, otherwise the confirmed list.
    pub fn accounts(&self) -> &[Account] {
        self.tentative.as_deref().unwrap_or(&self.confirmed)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.tentative.is_some()
    }

    fn find(&self, account_id: &str) -> Option<&Account> {
        self.accounts().iter().find(|account| account.id == account_id)
    }

    /// Replaces both views with the authoritative list. At most one
    /// account stays active: the first one the list marks active.
    pub fn reconcile(&mut self, mut accounts: Vec<Account>) {
        let demoted = keep_first_active(&mut accounts);
        if demoted > 0 {
            warn!(
                provider = %self.provider,
                demoted,
                "account list marks several accounts active; keeping the first"
            );
        }
        if let Some(id) = &self.editing {
            if !accounts.iter().any(|account| &account.id == id) {
                self.editing = None;
            }
        }
        self.confirmed = accounts;
        self.tentative = None;
    }

    pub async fn load(&mut self) -> Result<&[Account], BackendError> {
        let backend = Arc::clone(&self.backend);
        let provider = self.provider;
        let accounts = with_retry_if(self.retry, BackendError::is_transient, || {
            backend.get_accounts(provider)
        })
        .await?;
        self.reconcile(accounts);
        Ok(self.accounts())
    }

    async fn reload_after_failure(&mut self) {
        self.tentative = None;
        if let Err(err) = self.load().await {
            warn!(error = %err, "failed to reload accounts after a failed change");
        }
    }

    pub fn editing(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    /// Opens the single edit slot on `account_id`, closing any other.
    pub fn begin_edit(&mut self, account_id: &str) -> Result<(), SyncError> {
        if self.find(account_id).is_none() {
            return Err(SyncError::UnknownAccount(account_id.to_string()));
        }
        self.editing = Some(account_id.to_string());
        Ok(())
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    /// Marks `account_id` active locally and confirms with the backend in
    /// the background. The outcome arrives as `EngineEvent::AccountSwitched`.
    pub fn switch_account(&mut self, account_id: &str) -> Result<(), SyncError> {
        validate_account_id(account_id)?;
        let Some(target) = self.find(account_id) else {
            return Err(SyncError::UnknownAccount(account_id.to_string()));
        };
        if target.is_active {
            debug!(account_id, "account already active");
            return Ok(());
        }

        let mut view = self.accounts().to_vec();
        for account in &mut view {
            account.is_active = account.id == account_id;
        }
        self.tentative = Some(view);
        info!(account_id, provider = %self.provider, "switching account");

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let account_id = account_id.to_string();
        spawn_background("activate_account", async move {
            let result = backend
                .activate_account(&account_id)
                .await
                .map_err(|err| format!("switch account failed: {err}"));
            if let Err(message) = &result {
                warn!(account_id = %account_id, error = %message, "account switch rejected");
            }
            emit(&events, EngineEvent::AccountSwitched { account_id, result });
        });

        Ok(())
    }

    /// Validates locally, renames, then reloads the list from the backend
    /// whether or not the rename succeeded.
    pub async fn rename_account(&mut self, account_id: &str, name: &str) -> Result<(), SyncError> {
        let name = validate_account_name(name)?;
        validate_account_id(account_id)?;
        if self.find(account_id).is_none() {
            return Err(SyncError::UnknownAccount(account_id.to_string()));
        }

        let result = self
            .backend
            .update_account_name(account_id, &name)
            .await
            .map_err(SyncError::operation("rename account"));

        match &result {
            Ok(()) => {
                info!(account_id, "renamed account");
                self.editing = None;
                if let Err(err) = self.load().await {
                    warn!(error = %err, "failed to reload accounts after rename");
                }
            }
            Err(_) => self.reload_after_failure().await,
        }

        result
    }

    /// Local precondition for deletion, checked before any prompt.
    pub fn check_removable(&self, account_id: &str) -> Result<&Account, SyncError> {
        let account = self
            .find(account_id)
            .ok_or_else(|| SyncError::UnknownAccount(account_id.to_string()))?;
        if account.is_active {
            return Err(SyncError::ActiveAccountProtected(account.name.clone()));
        }
        Ok(account)
    }

    pub async fn remove_account(
        &mut self,
        account_id: &str,
        frontend: &dyn Frontend,
    ) -> Result<RemoveOutcome, SyncError> {
        validate_account_id(account_id)?;
        let prompt = {
            let account = self.check_removable(account_id)?;
            format!("Delete account \"{}\"?", account.name)
        };

        if !frontend.confirm(&prompt).await {
            debug!(account_id, "account deletion cancelled");
            return Ok(RemoveOutcome::Cancelled);
        }

        let deleted = self.backend.delete_account(account_id).await;
        match deleted {
            Ok(()) => {
                info!(account_id, "deleted account");
                let view = self
                    .accounts()
                    .iter()
                    .filter(|account| account.id != account_id)
                    .cloned()
                    .collect();
                self.tentative = Some(view);
                if self.editing.as_deref() == Some(account_id) {
                    self.editing = None;
                }
                emit(&self.events, EngineEvent::ReconcileRequested);
                Ok(RemoveOutcome::Removed)
            }
            Err(err) => {
                self.reload_after_failure().await;
                Err(SyncError::operation("delete account")(err))
            }
        }
    }

    /// Starts the external add-account flow and watches for the new account
    /// in the background. Giving up after the last attempt is silent.
    pub async fn add_account(&mut self) -> Result<(), SyncError> {
        let provider = self.provider;
        self.backend
            .add_account(provider)
            .await
            .map_err(SyncError::operation("add account"))?;

        let baseline = self.accounts().len();
        info!(provider = %provider, baseline, "waiting for new account");

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let schedule = self.poll;
        spawn_background("add_account_poll", async move {
            let outcome = poll_until(schedule, || {
                let backend = Arc::clone(&backend);
                async move {
                    match backend.get_accounts(provider).await {
                        Ok(accounts) if accounts.len() > baseline => Some(accounts.len()),
                        Ok(_) => None,
                        Err(err) => {
                            debug!(error = %err, "account poll failed");
                            None
                        }
                    }
                }
            })
            .await;

            match outcome {
                PollOutcome::Ready { value: count, attempts } => {
                    info!(provider = %provider, count, attempts, "new account detected");
                    emit(&events, EngineEvent::AccountAdded { provider, count });
                }
                PollOutcome::TimedOut { attempts } => {
                    debug!(provider = %provider, attempts, "stopped waiting for new account");
                }
            }
        });

        Ok(())
    }
}
