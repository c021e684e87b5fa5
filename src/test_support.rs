//! Fixtures shared by the workspace integration tests: a wiremock stand-in
//! for the usage backend and recording host collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aicap_sync::{
    Account, CacheStore, CachedSnapshot, DesktopNotifier, EngineDeps, EngineOptions, Frontend,
    HttpBackend, LimitsData, LocalStore, NoAutostart, PollSchedule, Provider, RetryPolicy,
    SyncConfig, SyncEngine, Toast, ViewState,
};

pub const TEST_TOKEN: &str = "test-token";

/// Installs a test-writer subscriber once. Controlled by `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn limits_json(provider: &str, primary: f64, secondary: f64) -> Value {
    json!({
        "provider": provider,
        "is_authenticated": true,
        "email": "dev@example.com",
        "plan_type": "plus",
        "primary_used_percent": primary,
        "primary_window_minutes": 300,
        "primary_reset_at": "2026-01-01T12:00:00",
        "secondary_used_percent": secondary,
        "secondary_window_minutes": 10080,
        "secondary_reset_at": "2026-01-07T12:00:00Z"
    })
}

pub fn account_json(id: &str, name: &str, is_active: bool) -> Value {
    json!({ "id": id, "provider": "openai", "name": name, "is_active": is_active })
}

/// Mock backend plus a scratch data directory for one engine.
pub struct BackendFixture {
    pub server: MockServer,
    pub data_dir: TempDir,
}

impl BackendFixture {
    pub async fn start() -> Result<Self> {
        init_test_tracing();
        Ok(Self {
            server: MockServer::start().await,
            data_dir: TempDir::new().context("creating data dir")?,
        })
    }

    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            api_url: self.server.uri(),
            api_token: Some(TEST_TOKEN.to_string()),
            data_dir: self.data_dir.path().to_path_buf(),
            request_timeout_secs: 2,
            connect_timeout_secs: 1,
            probe_timeout_secs: 1,
            ..SyncConfig::default()
        }
    }

    pub fn backend(&self) -> Result<HttpBackend> {
        Ok(HttpBackend::new(&self.config())?)
    }

    pub fn store(&self) -> LocalStore {
        LocalStore::new(self.data_dir.path())
    }

    pub async fn mount_health(&self, up: bool) {
        let status = if up { 200 } else { 503 };
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({"status": "ok"})))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_limits(&self, providers: Value) {
        Mock::given(method("GET"))
            .and(path("/api/v1/limits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "last_update": "2026-01-01T10:00:00",
                "providers": providers
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_accounts(&self, provider: Provider, accounts: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts"))
            .and(query_param("provider", provider.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": accounts })))
            .mount(&self.server)
            .await;
    }

    /// Answers the next `times` account listings with `accounts`, ahead of
    /// any mock mounted later.
    pub async fn mount_accounts_times(&self, accounts: Vec<Value>, times: u64) {
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": accounts })))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Healthy backend with an authenticated `openai` provider.
    pub async fn mount_online(&self, accounts: Vec<Value>, primary: f64) {
        self.mount_health(true).await;
        self.mount_limits(json!({ "openai": limits_json("openai", primary, 12.0) }))
            .await;
        self.mount_accounts(Provider::OpenAi, accounts).await;
    }

    pub fn seed_cache(&self, age: chrono::Duration, accounts: Vec<Account>) -> Result<DateTime<Utc>> {
        let data: LimitsData = serde_json::from_value(limits_json("openai", 33.0, 4.0))?;
        let timestamp = Utc::now() - age;
        CacheStore::new(self.store()).save_snapshot(&CachedSnapshot {
            limits: [("openai".to_string(), data)].into_iter().collect(),
            accounts,
            timestamp,
            active_provider: Provider::OpenAi,
        });
        Ok(timestamp)
    }

    pub fn cached(&self) -> Option<CachedSnapshot> {
        CacheStore::new(self.store()).load()
    }
}

/// Options with short waits so real-time tests finish quickly.
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        refresh_period: Duration::from_secs(300),
        debounce_window: Duration::from_millis(30),
        retry: RetryPolicy::new(3, Duration::from_millis(20)),
        poll: PollSchedule {
            initial_delay: Duration::from_millis(50),
            interval: Duration::from_millis(20),
            multiplier: 2.0,
            max_interval: Duration::from_millis(100),
            max_attempts: 20,
        },
    }
}

/// Frontend that remembers everything it was asked to show.
#[derive(Debug)]
pub struct RecordingFrontend {
    views: Mutex<Vec<ViewState>>,
    toasts: Mutex<Vec<Toast>>,
    prompts: Mutex<Vec<String>>,
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

    pub fn set_confirm_answer(&self, answer: bool) {
        self.confirm_answer.store(answer, Ordering::SeqCst);
    }

    pub fn last_view(&self) -> Option<ViewState> {
        self.views.lock().ok()?.last().cloned()
    }

    pub fn views(&self) -> Vec<ViewState> {
        self.views.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Frontend for RecordingFrontend {
    fn render(&self, view: &ViewState) {
        if let Ok(mut views) = self.views.lock() {
            views.push(view.clone());
        }
    }

    fn toast(&self, toast: Toast) {
        if let Ok(mut toasts) = self.toasts.lock() {
            toasts.push(toast);
        }
    }

    async fn confirm(&self, prompt: &str) -> bool {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.confirm_answer.load(Ordering::SeqCst)
    }
}

/// Notifier with a scripted permission answer.
#[derive(Debug)]
pub struct RecordingNotifier {
    granted: AtomicBool,
    grant_on_request: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new(granted: bool, grant_on_request: bool) -> Arc<Self> {
        Arc::new(Self {
            granted: AtomicBool::new(granted),
            grant_on_request,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DesktopNotifier for RecordingNotifier {
    fn permission_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn request_permission(&self) -> bool {
        self.granted.store(self.grant_on_request, Ordering::SeqCst);
        self.grant_on_request
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((title.to_string(), body.to_string()));
        }
        Ok(())
    }
}

/// Engine wired to the fixture's HTTP backend.
pub struct EngineHarness {
    pub fixture: BackendFixture,
    pub engine: SyncEngine,
    pub frontend: Arc<RecordingFrontend>,
    pub notifier: Arc<RecordingNotifier>,
}

impl EngineHarness {
    /// Builds the engine after `fixture`'s cache and settings are seeded.
    pub fn new(fixture: BackendFixture) -> Result<Self> {
        Self::with_notifier(fixture, RecordingNotifier::new(true, true))
    }

    pub fn with_notifier(fixture: BackendFixture, notifier: Arc<RecordingNotifier>) -> Result<Self> {
        let frontend = RecordingFrontend::new(true);
        let engine = SyncEngine::new(
            EngineDeps {
                backend: Arc::new(fixture.backend()?),
                frontend: frontend.clone(),
                notifier: notifier.clone(),
                autostart: Arc::new(NoAutostart),
                store: fixture.store(),
            },
            fast_options(),
        );
        Ok(Self {
            fixture,
            engine,
            frontend,
            notifier,
        })
    }

    /// Requests received by the mock server for `method` and `path`.
    pub async fn requests_to(&self, method: &str, path: &str) -> usize {
        self.fixture
            .server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == method && r.url.path() == path)
            .count()
    }
}
