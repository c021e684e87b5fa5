use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use tracing::{info, warn};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:1455";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            data_dir: Self::default_data_dir(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            probe_timeout_secs: 2,
            refresh_interval_secs: 300,
            debounce_ms: 300,
        }
    }
}

impl SyncConfig {
    /// Falls back to `./.aicap` when the platform data directory is unknown.
    fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("aicap"))
            .unwrap_or_else(|| {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(".aicap")
            })
    }

    pub fn from_env() -> Result<Self> {
        let mut config = SyncConfig::default();

        if let Ok(value) = env::var("AICAP_API_URL") {
            config.api_url = resolve_api_url(&value, cfg!(debug_assertions));
        }

        if let Ok(value) = env::var("AICAP_API_TOKEN") {
            config.api_token = Some(value.trim().to_string()).filter(|token| !token.is_empty());
        } else if let Ok(path) = env::var("AICAP_API_TOKEN_FILE") {
            let token = fs::read_to_string(&path)
                .with_context(|| format!("unable to read AICAP_API_TOKEN_FILE `{path}`"))?;
            config.api_token = Some(token.trim().to_string()).filter(|token| !token.is_empty());
        }

        if let Ok(value) = env::var("AICAP_DATA_DIR") {
            let path = PathBuf::from(&value);
            config.data_dir = if path.is_absolute() {
                path
            } else {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(path)
            };
        }

        if let Ok(value) = env::var("AICAP_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = value.parse::<u64>().map_err(|err| {
                anyhow!("invalid AICAP_REQUEST_TIMEOUT_SECS value `{value}`: {err}")
            })?;
        }

        if let Ok(value) = env::var("AICAP_REFRESH_INTERVAL_SECS") {
            config.refresh_interval_secs = value.parse::<u64>().map_err(|err| {
                anyhow!("invalid AICAP_REFRESH_INTERVAL_SECS value `{value}`: {err}")
            })?;
        }

        if let Ok(value) = env::var("AICAP_DEBOUNCE_MS") {
            config.debounce_ms = value
                .parse::<u64>()
                .map_err(|err| anyhow!("invalid AICAP_DEBOUNCE_MS value `{value}`: {err}"))?;
        }

        config.validate()?;

        info!(
            api_url = %config.api_url,
            data_dir = %config.data_dir.display(),
            token = config.api_token.is_some(),
            "sync configuration resolved"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_url)
            .map_err(|err| anyhow!("invalid AICAP_API_URL `{}`: {err}", self.api_url))?;

        for (name, value) in [
            ("AICAP_REQUEST_TIMEOUT_SECS", self.request_timeout_secs),
            ("connect timeout", self.connect_timeout_secs),
            ("probe timeout", self.probe_timeout_secs),
            ("AICAP_REFRESH_INTERVAL_SECS", self.refresh_interval_secs),
        ] {
            if Duration::from_secs(value).is_zero() {
                return Err(anyhow!("{name} must be greater than zero"));
            }
        }

        if self.data_dir.exists() && !self.data_dir.is_dir() {
            return Err(anyhow!(
                "data path `{}` is not a directory",
                self.data_dir.display()
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Debug builds take any override; release builds only accept a loopback
/// `http` URL with an explicit non-zero port.
fn resolve_api_url(override_url: &str, allow_any: bool) -> String {
    if allow_any || is_allowed_release_url(override_url) {
        return override_url.to_string();
    }

    warn!(
        rejected = %override_url,
        "ignoring AICAP_API_URL override; only loopback URLs are allowed"
    );
    DEFAULT_API_URL.to_string()
}

fn is_allowed_release_url(url: &str) -> bool {
    let port = ["http://localhost:", "http://127.0.0.1:"]
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix));

    let Some(port) = port else {
        return false;
    };

    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    matches!(port.parse::<u16>(), Ok(p) if p != 0)
}
