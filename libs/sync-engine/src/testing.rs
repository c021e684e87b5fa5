//! In-memory collaborators for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::backend::{Backend, BackendError};
use crate::frontend::{Frontend, Toast, ViewState};
use crate::model::{Account, LimitsData, LimitsResponse, Provider};
use crate::notify::DesktopNotifier;

pub fn account(id: &str, name: &str, is_active: bool) -> Account {
    Account {
        id: id.to_string(),
        provider: "openai".to_string(),
        name: name.to_string(),
        is_active,
    }
}

pub fn limits(provider: &str, primary: f64, secondary: f64) -> LimitsData {
    LimitsData {
        provider: provider.to_string(),
        is_authenticated: true,
        account_id: None,
        plan_type: Some("plus".to_string()),
        email: Some("dev@example.com".to_string()),
        primary_used_percent: Some(primary),
        primary_window_minutes: Some(300),
        primary_reset_at: None,
        secondary_used_percent: Some(secondary),
        secondary_window_minutes: Some(10080),
        secondary_reset_at: None,
        models: None,
        error: None,
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub available: bool,
    pub accounts: Vec<Account>,
    pub limits: BTreeMap<String, LimitsData>,
    /// Number of upcoming `fetch_limits` calls that fail transiently.
    pub failing_limit_fetches: usize,
    /// Time each `fetch_limits` call takes.
    pub limits_delay: Option<Duration>,
    pub fail_mutations: bool,
    /// After this many `get_accounts` calls, the account is added.
    pub add_account_after: Option<(usize, Account)>,
    pub calls: Vec<&'static str>,
}

/// Scriptable `Backend` that records every call.
#[derive(Debug, Default)]
pub struct FakeBackend {
    pub state: Mutex<FakeState>,
    hold_activation: AtomicBool,
    release_activation: Notify,
    account_polls: AtomicUsize,
}

impl FakeBackend {
    pub fn online(accounts: Vec<Account>, limits: Vec<LimitsData>) -> Arc<Self> {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            state.available = true;
            state.accounts = accounts;
            state.limits = limits
                .into_iter()
                .map(|data| (data.provider.clone(), data))
                .collect();
        }
        Arc::new(backend)
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self, op: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| **c == op).count())
    }

    pub fn total_calls(&self) -> usize {
        self.with_state(|s| s.calls.len())
    }

    /// Activation calls block until `release_activation` is called.
    pub fn hold_activation(&self) {
        self.hold_activation.store(true, Ordering::SeqCst);
    }

    pub fn release_activation(&self) {
        self.hold_activation.store(false, Ordering::SeqCst);
        self.release_activation.notify_waiters();
    }

    fn record(&self, op: &'static str) {
        self.with_state(|s| s.calls.push(op));
    }

    fn mutation_result(&self) -> Result<(), BackendError> {
        if self.with_state(|s| s.fail_mutations) {
            Err(BackendError::Api {
                operation: "mutation".to_string(),
                status: 500,
                message: "backend exploded".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn check_backend(&self) -> bool {
        self.record("check_backend");
        self.with_state(|s| s.available)
    }

    async fn fetch_limits(&self) -> Result<LimitsResponse, BackendError> {
        self.record("fetch_limits");
        if let Some(delay) = self.with_state(|s| s.limits_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            if s.failing_limit_fetches > 0 {
                s.failing_limit_fetches -= 1;
                return Err(BackendError::Network("connection reset".to_string()));
            }
            Ok(LimitsResponse {
                last_update: None,
                providers: s.limits.clone(),
            })
        })
    }

    async fn refresh_limits(&self) -> Result<(), BackendError> {
        self.record("refresh_limits");
        Ok(())
    }

    async fn get_accounts(&self, provider: Provider) -> Result<Vec<Account>, BackendError> {
        self.record("get_accounts");
        let polls = self.account_polls.fetch_add(1, Ordering::SeqCst) + 1;
        self.with_state(|s| {
            if let Some((after, _)) = &s.add_account_after {
                if polls >= *after {
                    if let Some((_, account)) = s.add_account_after.take() {
                        s.accounts.push(account);
                    }
                }
            }
            Ok(s.accounts
                .iter()
                .filter(|a| a.provider == provider.as_str())
                .cloned()
                .collect())
        })
    }

    async fn activate_account(&self, account_id: &str) -> Result<(), BackendError> {
        self.record("activate_account");
        while self.hold_activation.load(Ordering::SeqCst) {
            let released = self.release_activation.notified();
            if !self.hold_activation.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
        self.mutation_result()?;
        self.with_state(|s| {
            for account in &mut s.accounts {
                account.is_active = account.id == account_id;
            }
        });
        Ok(())
    }

    async fn update_account_name(&self, account_id: &str, name: &str) -> Result<(), BackendError> {
        self.record("update_account_name");
        self.mutation_result()?;
        self.with_state(|s| {
            if let Some(account) = s.accounts.iter_mut().find(|a| a.id == account_id) {
                account.name = name.to_string();
            }
        });
        Ok(())
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), BackendError> {
        self.record("delete_account");
        self.mutation_result()?;
        self.with_state(|s| s.accounts.retain(|a| a.id != account_id));
        Ok(())
    }

    async fn add_account(&self, _provider: Provider) -> Result<(), BackendError> {
        self.record("add_account");
        self.mutation_result()
    }

    async fn login(&self, _provider: Provider) -> Result<(), BackendError> {
        self.record("login");
        self.mutation_result()
    }

    async fn logout(&self, _provider: Provider) -> Result<(), BackendError> {
        self.record("logout");
        self.mutation_result()
    }
}

/// Frontend that records renders and toasts, and answers confirmations
/// with a fixed value.
#[derive(Debug)]
pub struct RecordingFrontend {
    pub views: Mutex<Vec<ViewState>>,
    pub toasts: Mutex<Vec<Toast>>,
    pub prompts: Mutex<Vec<String>>,
    confirm_answer: AtomicBool,
}

impl RecordingFrontend {
    pub fn new(confirm_answer: bool) -> Arc<Self> {
        Arc::new(Self {
            views: Mutex::new(Vec::new()),
            toasts: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            confirm_answer: AtomicBool::new(confirm_answer),
        })
    }

    pub fn last_view(&self) -> Option<ViewState> {
        self.views.lock().unwrap().last().cloned()
    }

    pub fn toast_count(&self) -> usize {
        self.toasts.lock().unwrap().len()
    }
}

#[async_trait]
impl Frontend for RecordingFrontend {
    fn render(&self, view: &ViewState) {
        self.views.lock().unwrap().push(view.clone());
    }

    fn toast(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }

    async fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.confirm_answer.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DesktopNotifier for RecordingNotifier {
    fn permission_granted(&self) -> bool {
        true
    }

    async fn request_permission(&self) -> bool {
        true
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}
