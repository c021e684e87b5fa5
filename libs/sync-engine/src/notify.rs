//! Usage threshold notifications.
//!
//! The gate latches per provider and window, so a window that stays above
//! the threshold notifies once and can only notify again after dropping
//! back below it.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::frontend::{Frontend, Toast, ToastKind};
use crate::model::{LimitsData, UsageWindow};

pub const NOTIFY_THRESHOLD_PERCENT: f64 = 80.0;

/// OS notification channel.
#[async_trait]
pub trait DesktopNotifier: Send + Sync {
    fn permission_granted(&self) -> bool;

    /// Prompts the user. Returns whether permission is now granted.
    async fn request_permission(&self) -> bool;

    fn notify(&self, title: &str, body: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageAlert {
    pub provider: String,
    pub window: UsageWindow,
    pub window_label: String,
    pub used_percent: f64,
}

impl UsageAlert {
    pub fn title(&self) -> String {
        format!("{} usage warning", provider_label(&self.provider))
    }

    pub fn body(&self) -> String {
        format!(
            "{:.0}% of the {} limit used",
            self.used_percent, self.window_label
        )
    }
}

fn provider_label(provider: &str) -> &str {
    provider
        .parse::<crate::model::Provider>()
        .map(|p| p.display_name())
        .unwrap_or(provider)
}

#[derive(Debug, Clone)]
pub struct NotificationGate {
    threshold: f64,
    notified: HashMap<(String, UsageWindow), bool>,
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self::new(NOTIFY_THRESHOLD_PERCENT)
    }
}

impl NotificationGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            notified: HashMap::new(),
        }
    }

    pub fn is_latched(&self, provider: &str, window: UsageWindow) -> bool {
        self.notified
            .get(&(provider.to_string(), window))
            .copied()
            .unwrap_or(false)
    }

    /// Returns the alerts that should fire for `limits`. Disabled
    /// notifications short-circuit before any latch is touched.
    pub fn evaluate(&mut self, limits: &LimitsData, enabled: bool) -> Vec<UsageAlert> {
        if !enabled || !limits.is_authenticated {
            return Vec::new();
        }

        let mut alerts = Vec::new();
        for window in UsageWindow::ALL {
            let Some(percent) = limits.used_percent(window) else {
                continue;
            };

            let latch = self
                .notified
                .entry((limits.provider.clone(), window))
                .or_insert(false);

            if percent >= self.threshold {
                if !*latch {
                    *latch = true;
                    alerts.push(UsageAlert {
                        provider: limits.provider.clone(),
                        window,
                        window_label: window.label(limits.window_minutes(window)),
                        used_percent: percent,
                    });
                }
            } else {
                *latch = false;
            }
        }

        alerts
    }

    /// Sends `alerts`, asking for OS permission only when there is something
    /// to send. Refused permission or a failed send degrades to a toast.
    pub async fn deliver(
        alerts: &[UsageAlert],
        notifier: &dyn DesktopNotifier,
        frontend: &dyn Frontend,
    ) {
        if alerts.is_empty() {
            return;
        }

        let granted = notifier.permission_granted() || notifier.request_permission().await;
        if !granted {
            debug!("notification permission refused; using in-app toast");
        }

        for alert in alerts {
            let title = alert.title();
            let body = alert.body();

            if granted {
                match notifier.notify(&title, &body) {
                    Ok(()) => {
                        info!(
                            provider = %alert.provider,
                            window = ?alert.window,
                            percent = alert.used_percent,
                            "sent usage notification"
                        );
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "desktop notification failed; using in-app toast");
                    }
                }
            }

            frontend.toast(Toast::new(ToastKind::Warning, format!("{title}: {body}")));
        }
    }
}
