//! The engine loop.
//!
//! `SyncEngine` owns all client state. User commands, background task
//! completions and scheduler triggers are handled one at a time on the
//! task that calls [`SyncEngine::run`], so no state is shared or locked.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::accounts::{AccountStore, RemoveOutcome};
use crate::autostart::AutostartControl;
use crate::backend::{with_retry_if, Backend, BackendError, RetryPolicy};
use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{emit, EngineEvent, EventReceiver, EventSender};
use crate::frontend::{Frontend, Toast, ToastKind, ViewState};
use crate::model::{Account, LimitsData, Provider};
use crate::notify::{DesktopNotifier, NotificationGate};
use crate::poll::{poll_until, PollOutcome, PollSchedule};
use crate::scheduler::{
    InFlightGuard, RefreshScheduler, Trigger, DEFAULT_DEBOUNCE_WINDOW, DEFAULT_REFRESH_PERIOD,
};
use crate::settings::{Settings, SettingsStore};
use crate::storage::LocalStore;
use crate::tasks::{panic_message, spawn_background};

const UNEXPECTED_ERROR: &str = "Something went wrong. Press refresh to try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Manual refresh. Bursts are debounced into one cycle.
    Refresh,
    SetVisible(bool),
    SetAutoRefresh(bool),
    SetNotifications(bool),
    SetLocale(String),
    SwitchProvider(Provider),
    SwitchAccount(String),
    BeginRename(String),
    CancelRename,
    RenameAccount { account_id: String, name: String },
    RemoveAccount(String),
    AddAccount,
    Login,
    Logout,
    SetAutostart(bool),
    /// Reports whether launch at login is currently enabled.
    ShowAutostart,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Fresh,
    Cached {
        stale: bool,
        cached_at: DateTime<Utc>,
    },
    /// Backend unreachable and nothing cached.
    Offline,
    /// Fetch failed and nothing cached.
    Failed(String),
    /// Another refresh was already running.
    Skipped,
}

/// Collaborators the engine drives.
pub struct EngineDeps {
    pub backend: Arc<dyn Backend>,
    pub frontend: Arc<dyn Frontend>,
    pub notifier: Arc<dyn DesktopNotifier>,
    pub autostart: Arc<dyn AutostartControl>,
    pub store: LocalStore,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub refresh_period: Duration,
    pub debounce_window: Duration,
    pub retry: RetryPolicy,
    pub poll: PollSchedule,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            refresh_period: DEFAULT_REFRESH_PERIOD,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            retry: RetryPolicy::default(),
            poll: PollSchedule::default(),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            refresh_period: config.refresh_interval(),
            debounce_window: config.debounce_window(),
            ..Self::default()
        }
    }
}

enum Step {
    Command(EngineCommand),
    Event(EngineEvent),
    Trigger(Trigger),
    Fetched(Fetched),
    Stop,
}

/// Network half of a refresh cycle.
enum Fetched {
    Unavailable,
    Failed(BackendError),
    Data {
        accounts: Vec<Account>,
        limits: BTreeMap<String, LimitsData>,
    },
}

/// A refresh whose network calls are still running. The latch stays held
/// until the result has been applied or the refresh is abandoned.
struct PendingRefresh {
    guard: InFlightGuard,
    fetch: BoxFuture<'static, Fetched>,
}

/// Probe, then accounts strictly before limits. `force` asks the backend to
/// re-query its providers first.
async fn fetch_cycle(
    backend: Arc<dyn Backend>,
    provider: Provider,
    retry: RetryPolicy,
    force: bool,
) -> Fetched {
    if !backend.check_backend().await {
        return Fetched::Unavailable;
    }

    if force {
        if let Err(err) = backend.refresh_limits().await {
            debug!(error = %err, "forced backend refresh failed; fetching anyway");
        }
    }

    let accounts = match with_retry_if(retry, BackendError::is_transient, || {
        backend.get_accounts(provider)
    })
    .await
    {
        Ok(accounts) => accounts,
        Err(err) => return Fetched::Failed(err),
    };

    match with_retry_if(retry, BackendError::is_transient, || backend.fetch_limits()).await {
        Ok(response) => Fetched::Data {
            accounts,
            limits: response.providers,
        },
        Err(err) => Fetched::Failed(err),
    }
}

async fn wait_fetched(pending: &mut Option<PendingRefresh>) -> Fetched {
    match pending {
        Some(pending) => (&mut pending.fetch).await,
        None => std::future::pending().await,
    }
}

/// Where the data currently on screen came from.
#[derive(Debug, Clone, Copy, Default)]
struct Freshness {
    stale: bool,
    cached_at: Option<DateTime<Utc>>,
}

pub struct SyncEngine {
    backend: Arc<dyn Backend>,
    frontend: Arc<dyn Frontend>,
    notifier: Arc<dyn DesktopNotifier>,
    autostart: Arc<dyn AutostartControl>,
    cache: CacheStore,
    settings_store: SettingsStore,
    settings: Settings,
    locale: String,
    accounts: AccountStore,
    limits: BTreeMap<String, LimitsData>,
    freshness: Freshness,
    gate: NotificationGate,
    scheduler: RefreshScheduler,
    retry: RetryPolicy,
    poll: PollSchedule,
    events_tx: EventSender,
    events_rx: EventReceiver,
    pending: Option<PendingRefresh>,
    view: ViewState,
}

impl SyncEngine {
    pub fn new(deps: EngineDeps, options: EngineOptions) -> Self {
        let cache = CacheStore::new(deps.store.clone());
        let settings_store = SettingsStore::new(deps.store);
        let settings = settings_store.load();
        let locale = settings_store.load_locale();
        let provider = cache
            .load()
            .map(|snapshot| snapshot.active_provider)
            .unwrap_or_default();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accounts = AccountStore::new(
            Arc::clone(&deps.backend),
            events_tx.clone(),
            provider,
            options.retry,
            options.poll,
        );
        let scheduler = RefreshScheduler::new(
            options.refresh_period,
            options.debounce_window,
            settings.auto_refresh,
        );

        info!(
            provider = %provider,
            notifications = settings.notifications,
            auto_refresh = settings.auto_refresh,
            locale = %locale,
            "sync engine initialised"
        );

        Self {
            backend: deps.backend,
            frontend: deps.frontend,
            notifier: deps.notifier,
            autostart: deps.autostart,
            cache,
            settings_store,
            settings,
            locale,
            accounts,
            limits: BTreeMap::new(),
            freshness: Freshness::default(),
            gate: NotificationGate::default(),
            scheduler,
            retry: options.retry,
            poll: options.poll,
            events_tx,
            events_rx,
            pending: None,
            view: ViewState::Loading,
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn provider(&self) -> Provider {
        self.accounts.provider()
    }

    pub fn accounts(&self) -> &[Account] {
        self.accounts.accounts()
    }

    pub fn limits(&self) -> &BTreeMap<String, LimitsData> {
        &self.limits
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn autostart_enabled(&self) -> Result<bool, SyncError> {
        self.autostart.is_enabled().map_err(SyncError::Autostart)
    }

    fn render(&mut self, view: ViewState) {
        self.frontend.render(&view);
        self.view = view;
    }

    fn render_ready(&mut self) {
        let view = ViewState::Ready {
            provider: self.accounts.provider(),
            limits: self.limits.clone(),
            accounts: self.accounts.accounts().to_vec(),
            editing: self.accounts.editing().map(str::to_string),
            stale: self.freshness.stale,
            cached_at: self.freshness.cached_at,
        };
        self.render(view);
    }

    /// Re-renders after a local change. Offline and error screens stay.
    fn rerender(&mut self) {
        if matches!(self.view, ViewState::Ready { .. }) {
            self.render_ready();
        }
    }

    /// One refresh cycle: probe, accounts, limits (retried), cache,
    /// notifications, render. Any failure falls back to the cached
    /// snapshot. Returns `Skipped` while another refresh is in flight.
    pub async fn refresh(&mut self) -> RefreshOutcome {
        let Some(mut pending) = self.begin_refresh(false) else {
            debug!("refresh already in flight; skipping");
            return RefreshOutcome::Skipped;
        };
        let fetched = (&mut pending.fetch).await;
        self.complete_refresh(pending, fetched).await
    }

    fn begin_refresh(&self, force: bool) -> Option<PendingRefresh> {
        let guard = self.scheduler.in_flight().try_begin()?;
        let fetch = fetch_cycle(
            Arc::clone(&self.backend),
            self.accounts.provider(),
            self.retry,
            force,
        );
        Some(PendingRefresh {
            guard,
            fetch: fetch.boxed(),
        })
    }

    /// Starts a refresh that the run loop drives alongside other input.
    fn start_refresh(&mut self, force: bool) {
        match self.begin_refresh(force) {
            Some(pending) => self.pending = Some(pending),
            None => debug!(force, "refresh already in flight; ignoring request"),
        }
    }

    /// Abandons an in-flight refresh started for stale state and runs a
    /// new one to completion.
    async fn restart_refresh(&mut self) -> RefreshOutcome {
        if self.pending.take().is_some() {
            debug!("abandoning in-flight refresh");
        }
        self.refresh().await
    }

    async fn complete_refresh(
        &mut self,
        pending: PendingRefresh,
        fetched: Fetched,
    ) -> RefreshOutcome {
        let _guard = pending.guard;
        match fetched {
            Fetched::Unavailable => {
                info!("backend unavailable; falling back to cached data");
                self.fall_back(None)
            }
            Fetched::Failed(err) => {
                warn!(error = %err, "refresh failed; falling back to cached data");
                self.fall_back(Some(err.to_string()))
            }
            Fetched::Data { accounts, limits } => {
                self.accounts.reconcile(accounts);
                self.limits = limits;
                self.cache.save(
                    &self.limits,
                    self.accounts.accounts(),
                    self.accounts.provider(),
                );
                self.freshness = Freshness::default();
                self.evaluate_notifications().await;
                self.render_ready();
                debug!(
                    provider = %self.accounts.provider(),
                    accounts = self.accounts.accounts().len(),
                    "refresh complete"
                );
                RefreshOutcome::Fresh
            }
        }
    }

    fn fall_back(&mut self, failure: Option<String>) -> RefreshOutcome {
        let Some(snapshot) = self.cache.load() else {
            return match failure {
                None => {
                    self.render(ViewState::BackendOffline);
                    RefreshOutcome::Offline
                }
                Some(message) => {
                    self.render(ViewState::Error {
                        message: message.clone(),
                    });
                    RefreshOutcome::Failed(message)
                }
            };
        };

        let stale = self.cache.is_stale(snapshot.timestamp);
        let cached_at = snapshot.timestamp;
        self.limits = snapshot.limits;
        if snapshot.active_provider == self.accounts.provider() {
            self.accounts.reconcile(snapshot.accounts);
        } else {
            debug!(
                cached = %snapshot.active_provider,
                "cached accounts belong to another provider; not restoring them"
            );
        }
        self.freshness = Freshness {
            stale,
            cached_at: Some(cached_at),
        };
        self.render_ready();
        RefreshOutcome::Cached { stale, cached_at }
    }

    async fn evaluate_notifications(&mut self) {
        let provider = self.accounts.provider();
        let Some(data) = self.limits.get(provider.as_str()) else {
            return;
        };
        let alerts = self.gate.evaluate(data, self.settings.notifications);
        NotificationGate::deliver(&alerts, self.notifier.as_ref(), self.frontend.as_ref()).await;
    }

    fn report_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::AccountSwitched {
                result: Err(message),
                ..
            } => self.frontend.toast(Toast::error(message.clone())),
            EngineEvent::AccountAdded { provider, count } => {
                info!(provider = %provider, count, "account added");
            }
            EngineEvent::LoginCompleted { provider } => {
                info!(provider = %provider, "login completed");
            }
            _ => {}
        }
        debug!(?event, "reconciling after background change");
    }

    /// Every background completion is followed by exactly one refresh.
    pub async fn handle_event(&mut self, event: EngineEvent) {
        self.report_event(&event);
        self.refresh().await;
    }

    /// Runs `command`. Errors are returned for the caller to present.
    pub async fn execute(&mut self, command: EngineCommand) -> Result<(), SyncError> {
        match command {
            EngineCommand::Refresh => {
                if !self.scheduler.request_manual() {
                    debug!("refresh already in flight; ignoring request");
                }
            }
            EngineCommand::SetVisible(visible) => self.scheduler.set_visible(visible),
            EngineCommand::SetAutoRefresh(enabled) => {
                self.settings.auto_refresh = enabled;
                self.settings_store.save(&self.settings);
                self.scheduler.set_auto_refresh(enabled);
            }
            EngineCommand::SetNotifications(enabled) => {
                self.settings.notifications = enabled;
                self.settings_store.save(&self.settings);
            }
            EngineCommand::SetLocale(locale) => {
                let locale = locale.trim();
                if locale.is_empty() {
                    return Err(SyncError::Validation("locale cannot be empty".to_string()));
                }
                self.locale = locale.to_string();
                self.settings_store.save_locale(&self.locale);
            }
            EngineCommand::SwitchProvider(provider) => {
                if provider != self.accounts.provider() {
                    info!(provider = %provider, "switching provider");
                    self.accounts.set_provider(provider);
                    self.render(ViewState::Loading);
                    self.restart_refresh().await;
                }
            }
            EngineCommand::SwitchAccount(account_id) => {
                self.accounts.switch_account(&account_id)?;
                self.rerender();
            }
            EngineCommand::BeginRename(account_id) => {
                self.accounts.begin_edit(&account_id)?;
                self.rerender();
            }
            EngineCommand::CancelRename => {
                self.accounts.cancel_edit();
                self.rerender();
            }
            EngineCommand::RenameAccount { account_id, name } => {
                let result = self.accounts.rename_account(&account_id, &name).await;
                self.rerender();
                result?;
            }
            EngineCommand::RemoveAccount(account_id) => {
                let frontend = Arc::clone(&self.frontend);
                let result = self
                    .accounts
                    .remove_account(&account_id, frontend.as_ref())
                    .await;
                self.rerender();
                if result? == RemoveOutcome::Removed {
                    self.frontend
                        .toast(Toast::new(ToastKind::Info, "Account deleted"));
                }
            }
            EngineCommand::AddAccount => {
                self.accounts.add_account().await?;
                self.frontend.toast(Toast::new(
                    ToastKind::Info,
                    "Finish adding the account in your browser",
                ));
            }
            EngineCommand::Login => self.login().await?,
            EngineCommand::Logout => self.logout().await?,
            EngineCommand::SetAutostart(enabled) => {
                self.autostart
                    .set_enabled(enabled)
                    .map_err(SyncError::Autostart)?;
                info!(enabled, "autostart updated");
            }
            EngineCommand::ShowAutostart => {
                let state = if self.autostart_enabled()? { "on" } else { "off" };
                self.frontend
                    .toast(Toast::new(ToastKind::Info, format!("Launch at login is {state}")));
            }
            EngineCommand::Shutdown => {}
        }
        Ok(())
    }

    /// Opens the provider's browser login and waits in the background until
    /// the backend reports the provider as authenticated.
    pub async fn login(&mut self) -> Result<(), SyncError> {
        let provider = self.accounts.provider();
        self.backend
            .login(provider)
            .await
            .map_err(SyncError::operation("login"))?;
        info!(provider = %provider, "waiting for login to complete");

        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        let schedule = self.poll;
        spawn_background("login_poll", async move {
            let outcome = poll_until(schedule, || {
                let backend = Arc::clone(&backend);
                async move {
                    match backend.fetch_limits().await {
                        Ok(response) => response
                            .providers
                            .get(provider.as_str())
                            .filter(|data| data.is_authenticated)
                            .map(|_| ()),
                        Err(err) => {
                            debug!(error = %err, "login poll failed");
                            None
                        }
                    }
                }
            })
            .await;

            match outcome {
                PollOutcome::Ready { attempts, .. } => {
                    debug!(provider = %provider, attempts, "provider authenticated");
                    emit(&events, EngineEvent::LoginCompleted { provider });
                }
                PollOutcome::TimedOut { attempts } => {
                    debug!(provider = %provider, attempts, "stopped waiting for login");
                }
            }
        });

        Ok(())
    }

    pub async fn logout(&mut self) -> Result<(), SyncError> {
        let provider = self.accounts.provider();
        self.backend
            .logout(provider)
            .await
            .map_err(SyncError::operation("logout"))?;
        info!(provider = %provider, "logged out");
        self.restart_refresh().await;
        Ok(())
    }

    async fn dispatch(&mut self, step: Step) {
        match step {
            Step::Command(command) => {
                debug!(?command, "handling command");
                if let Err(err) = self.execute(command).await {
                    if err.is_local() {
                        debug!(error = %err, "command rejected");
                    } else {
                        warn!(error = %err, "command failed");
                    }
                    self.frontend.toast(Toast::error(err.to_string()));
                }
            }
            Step::Event(event) => {
                self.report_event(&event);
                self.start_refresh(false);
            }
            Step::Trigger(trigger) => self.start_refresh(trigger == Trigger::Manual),
            Step::Fetched(fetched) => {
                if let Some(pending) = self.pending.take() {
                    self.complete_refresh(pending, fetched).await;
                }
            }
            Step::Stop => {}
        }
    }

    /// Refreshes once, then serves commands, background events and timer
    /// triggers until `Shutdown` arrives or the command channel closes.
    /// Refreshes run alongside other input, so requests arriving while one
    /// is in flight are dropped rather than queued behind it.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        self.render(ViewState::Loading);
        self.start_refresh(false);

        loop {
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => Step::Stop,
                    Some(command) => Step::Command(command),
                },
                Some(event) = self.events_rx.recv() => Step::Event(event),
                trigger = self.scheduler.next_trigger() => Step::Trigger(trigger),
                fetched = wait_fetched(&mut self.pending) => Step::Fetched(fetched),
            };

            if matches!(step, Step::Stop) {
                info!("sync engine stopping");
                break;
            }

            if let Err(panic) = AssertUnwindSafe(self.dispatch(step)).catch_unwind().await {
                error!(panic = %panic_message(&*panic), "engine step panicked");
                self.render(ViewState::Error {
                    message: UNEXPECTED_ERROR.to_string(),
                });
            }
        }
    }
}
