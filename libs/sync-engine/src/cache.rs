use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{Account, LimitsData, Provider};
use crate::storage::LocalStore;

const CACHE_KEY: &str = "usage_cache";

/// Age after which a snapshot is shown as stale.
pub const STALE_AFTER_MINUTES: i64 = 30;

/// Last fully successful refresh, kept for offline display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    pub limits: BTreeMap<String, LimitsData>,
    pub accounts: Vec<Account>,
    pub timestamp: DateTime<Utc>,
    pub active_provider: Provider,
}

impl CachedSnapshot {
    /// Every cached account must belong to the provider the snapshot was
    /// taken for.
    pub fn is_consistent(&self) -> bool {
        self.accounts
            .iter()
            .all(|account| account.provider == self.active_provider.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    store: LocalStore,
    horizon: Duration,
}

impl CacheStore {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            horizon: Duration::minutes(STALE_AFTER_MINUTES),
        }
    }

    /// Best-effort: failures are logged, never returned.
    pub fn save(
        &self,
        limits: &BTreeMap<String, LimitsData>,
        accounts: &[Account],
        provider: Provider,
    ) {
        let snapshot = CachedSnapshot {
            limits: limits.clone(),
            accounts: accounts.to_vec(),
            timestamp: Utc::now(),
            active_provider: provider,
        };
        self.save_snapshot(&snapshot);
    }

    pub fn save_snapshot(&self, snapshot: &CachedSnapshot) {
        match self.store.write(CACHE_KEY, snapshot) {
            Ok(()) => debug!(
                provider = %snapshot.active_provider,
                accounts = snapshot.accounts.len(),
                "cached usage snapshot"
            ),
            Err(err) => warn!(error = %err, "failed to cache usage snapshot"),
        }
    }

    /// Returns `None` for absent, corrupt or inconsistent snapshots.
    pub fn load(&self) -> Option<CachedSnapshot> {
        let snapshot = self.store.read::<CachedSnapshot>(CACHE_KEY)?;
        if !snapshot.is_consistent() {
            warn!(
                provider = %snapshot.active_provider,
                "discarding cached snapshot with accounts from another provider"
            );
            return None;
        }
        Some(snapshot)
    }

    pub fn is_stale(&self, timestamp: DateTime<Utc>) -> bool {
        self.is_stale_at(timestamp, Utc::now())
    }

    pub fn is_stale_at(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - timestamp > self.horizon
    }
}
