use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Providers the backend knows how to track.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Antigravity,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::OpenAi, Provider::Antigravity];

    /// Identifier used in backend routes and response maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Antigravity => "antigravity",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "Codex",
            Provider::Antigravity => "Antigravity",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "codex" => Ok(Provider::OpenAi),
            "antigravity" => Ok(Provider::Antigravity),
            other => Err(format!("unknown provider `{other}`")),
        }
    }
}

/// Quota for a single model, reported by providers that meter per model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelQuota {
    pub model_name: String,
    pub display_name: String,
    #[serde(default)]
    pub remaining_fraction: Option<f64>,
    pub used_percent: f64,
    #[serde(default, with = "lenient_timestamp")]
    pub reset_time: Option<DateTime<Utc>>,
}

/// Per-provider usage snapshot. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsData {
    pub provider: String,
    pub is_authenticated: bool,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub primary_used_percent: Option<f64>,
    #[serde(default)]
    pub primary_window_minutes: Option<u32>,
    #[serde(default, with = "lenient_timestamp")]
    pub primary_reset_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secondary_used_percent: Option<f64>,
    #[serde(default)]
    pub secondary_window_minutes: Option<u32>,
    #[serde(default, with = "lenient_timestamp")]
    pub secondary_reset_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<ModelQuota>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl LimitsData {
    pub fn used_percent(&self, window: UsageWindow) -> Option<f64> {
        match window {
            UsageWindow::Primary => self.primary_used_percent,
            UsageWindow::Secondary => self.secondary_used_percent,
        }
    }

    pub fn window_minutes(&self, window: UsageWindow) -> Option<u32> {
        match window {
            UsageWindow::Primary => self.primary_window_minutes,
            UsageWindow::Secondary => self.secondary_window_minutes,
        }
    }
}

/// Usage-accounting period a percentage refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageWindow {
    Primary,
    Secondary,
}

impl UsageWindow {
    pub const ALL: [UsageWindow; 2] = [UsageWindow::Primary, UsageWindow::Secondary];

    /// Short label such as `5h` or `7d`, falling back to the window's role.
    pub fn label(&self, minutes: Option<u32>) -> String {
        match minutes {
            Some(m) if m >= 1440 && m % 1440 == 0 => format!("{}d", m / 1440),
            Some(m) if m >= 60 && m % 60 == 0 => format!("{}h", m / 60),
            Some(m) if m > 0 => format!("{m}m"),
            _ => match self {
                UsageWindow::Primary => "primary".to_string(),
                UsageWindow::Secondary => "secondary".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsResponse {
    #[serde(default, with = "lenient_timestamp")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub providers: BTreeMap<String, LimitsData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps (read as UTC). Anything
/// else decodes to `None` instead of failing the surrounding document.
pub(crate) mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
