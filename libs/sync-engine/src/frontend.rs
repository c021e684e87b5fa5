use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Account, LimitsData, Provider};

/// What the UI should currently show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewState {
    Loading,
    Ready {
        provider: Provider,
        limits: BTreeMap<String, LimitsData>,
        accounts: Vec<Account>,
        editing: Option<String>,
        stale: bool,
        /// Set when the data comes from the offline cache.
        cached_at: Option<DateTime<Utc>>,
    },
    BackendOffline,
    Error {
        message: String,
    },
}

impl ViewState {
    pub fn is_stale(&self) -> bool {
        matches!(self, ViewState::Ready { stale: true, .. })
    }

    pub fn is_cached(&self) -> bool {
        matches!(
            self,
            ViewState::Ready {
                cached_at: Some(_),
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub fn new(kind: ToastKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ToastKind::Error, message)
    }
}

/// The rendering side of the client.
#[async_trait]
pub trait Frontend: Send + Sync {
    fn render(&self, view: &ViewState);

    fn toast(&self, toast: Toast);

    /// Yes/no gate shown before destructive actions.
    async fn confirm(&self, prompt: &str) -> bool;
}
