//! Client-side synchronization engine for the AI usage tray.
//!
//! [`SyncEngine`] polls the local usage backend, keeps the last good state
//! on disk for offline display, applies account changes optimistically and
//! turns usage crossings into one-shot desktop notifications. Rendering,
//! OS notifications and autostart are supplied by the host through the
//! [`Frontend`], [`DesktopNotifier`] and [`AutostartControl`] traits.

pub mod accounts;
pub mod autostart;
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frontend;
pub mod model;
pub mod notify;
pub mod poll;
pub mod scheduler;
pub mod settings;
pub mod storage;
mod tasks;

#[cfg(test)]
mod testing;

pub use accounts::{validate_account_name, AccountStore, RemoveOutcome};
pub use autostart::{AutostartControl, NoAutostart};
pub use backend::{Backend, BackendError, HttpBackend, RetryPolicy};
pub use cache::{CacheStore, CachedSnapshot};
pub use config::SyncConfig;
pub use engine::{EngineCommand, EngineDeps, EngineOptions, RefreshOutcome, SyncEngine};
pub use error::SyncError;
pub use events::EngineEvent;
pub use frontend::{Frontend, Toast, ToastKind, ViewState};
pub use model::{Account, LimitsData, LimitsResponse, Provider, UsageWindow};
pub use notify::{DesktopNotifier, NotificationGate, UsageAlert};
pub use poll::{poll_until, PollOutcome, PollSchedule};
pub use scheduler::RefreshScheduler;
pub use settings::{Settings, SettingsStore};
pub use storage::LocalStore;
