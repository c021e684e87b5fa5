use std::env;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::warn;

use aicap_sync::{Frontend, LimitsData, Toast, ToastKind, UsageWindow, ViewState};

/// Answer slot for an open yes/no prompt. The stdin reader fills it.
pub type PendingConfirm = Arc<Mutex<Option<oneshot::Sender<bool>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Text,
    /// One JSON document per line, for a graphical shell reading stdout.
    Json,
}

impl RenderMode {
    pub fn from_env() -> Self {
        match env::var("AICAP_TRAY_OUTPUT").as_deref() {
            Ok("json") => RenderMode::Json,
            _ => RenderMode::Text,
        }
    }
}

pub struct ConsoleFrontend {
    mode: RenderMode,
    pending: PendingConfirm,
}

impl ConsoleFrontend {
    pub fn new(mode: RenderMode, pending: PendingConfirm) -> Self {
        Self { mode, pending }
    }

    fn emit(&self, value: serde_json::Value) {
        match serde_json::to_string(&value) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "failed to encode frontend message"),
        }
    }
}

#[async_trait]
impl Frontend for ConsoleFrontend {
    fn render(&self, view: &ViewState) {
        match self.mode {
            RenderMode::Json => self.emit(serde_json::json!({ "view": view })),
            RenderMode::Text => println!("{}", render_text(view)),
        }
    }

    fn toast(&self, toast: Toast) {
        match self.mode {
            RenderMode::Json => self.emit(serde_json::json!({ "toast": toast })),
            RenderMode::Text => {
                let tag = match toast.kind {
                    ToastKind::Info => "info",
                    ToastKind::Warning => "warning",
                    ToastKind::Error => "error",
                };
                println!("[{tag}] {}", toast.message);
            }
        }
    }

    async fn confirm(&self, prompt: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        match self.pending.lock() {
            Ok(mut slot) => *slot = Some(tx),
            Err(_) => {
                warn!("confirmation slot poisoned; treating as declined");
                return false;
            }
        }

        match self.mode {
            RenderMode::Json => self.emit(serde_json::json!({ "confirm": prompt })),
            RenderMode::Text => println!("{prompt} [y/N]"),
        }

        rx.await.unwrap_or(false)
    }
}

pub fn render_text(view: &ViewState) -> String {
    match view {
        ViewState::Loading => "Loading...".to_string(),
        ViewState::BackendOffline => {
            "Backend is not running. Start it and type `refresh`.".to_string()
        }
        ViewState::Error { message } => format!("Error: {message}. Type `refresh` to retry."),
        ViewState::Ready {
            provider,
            limits,
            accounts,
            editing,
            stale,
            cached_at,
        } => {
            let mut out = String::new();
            let _ = write!(out, "== {} ==", provider.display_name());
            if let Some(cached_at) = cached_at {
                let _ = write!(out, " (offline, cached {})", format_age(*cached_at));
                if *stale {
                    out.push_str(" [stale]");
                }
            }

            match limits.get(provider.as_str()) {
                Some(data) => render_limits(&mut out, data),
                None => out.push_str("\nNo usage data."),
            }

            for account in accounts {
                let marker = if account.is_active { '*' } else { ' ' };
                let edit = if editing.as_deref() == Some(account.id.as_str()) {
                    " (renaming)"
                } else {
                    ""
                };
                let _ = write!(out, "\n {marker} {} [{}]{edit}", account.name, account.id);
            }
            out
        }
    }
}

fn format_age(cached_at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - cached_at).num_minutes().max(0);
    match minutes {
        0 => "just now".to_string(),
        m if m < 60 => format!("{m} min ago"),
        m if m < 24 * 60 => format!("{} h ago", m / 60),
        m => format!("{} d ago", m / (24 * 60)),
    }
}

fn render_limits(out: &mut String, data: &LimitsData) {
    if !data.is_authenticated {
        out.push_str("\nNot signed in. Type `login`.");
        return;
    }
    if let Some(email) = &data.email {
        let _ = write!(out, "\n{email}");
        if let Some(plan) = &data.plan_type {
            let _ = write!(out, " ({plan})");
        }
    }
    for window in UsageWindow::ALL {
        if let Some(percent) = data.used_percent(window) {
            let label = window.label(data.window_minutes(window));
            let _ = write!(out, "\n  {label:>9}: {percent:>5.1}%");
        }
    }
    for model in data.models.iter().flatten() {
        let _ = write!(out, "\n  {:>9}: {:>5.1}%", model.display_name, model.used_percent);
    }
    if let Some(error) = &data.error {
        let _ = write!(out, "\n  ! {error}");
    }
}
