use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::LocalStore;

const SETTINGS_KEY: &str = "settings";
const LOCALE_KEY: &str = "locale";
pub const DEFAULT_LOCALE: &str = "en";

/// User preferences. Missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub notifications: bool,
    pub auto_refresh: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notifications: true,
            auto_refresh: true,
        }
    }
}

/// Loads preferences once at startup and persists explicit user changes.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    store: LocalStore,
}

impl SettingsStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Settings {
        self.store.read(SETTINGS_KEY).unwrap_or_default()
    }

    pub fn save(&self, settings: &Settings) {
        if let Err(err) = self.store.write(SETTINGS_KEY, settings) {
            warn!(error = %err, "failed to persist settings");
        }
    }

    pub fn load_locale(&self) -> String {
        self.store
            .read::<String>(LOCALE_KEY)
            .filter(|locale| !locale.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
    }

    pub fn save_locale(&self, locale: &str) {
        if let Err(err) = self.store.write(LOCALE_KEY, &locale) {
            warn!(error = %err, locale, "failed to persist locale");
        }
    }
}
