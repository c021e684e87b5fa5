use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use tracing::{debug, info};

use super::error::{map_api_error, BackendError};
use super::{validate_account_id, Backend};
use crate::config::SyncConfig;
use crate::model::{Account, AccountsResponse, LimitsResponse, Provider};

const TOKEN_HEADER: &str = "x-aicap-token";

/// reqwest-backed client for the backend's `/api/v1` surface.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    probe_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &SyncConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|err| BackendError::InvalidRequest(format!("invalid api url: {err}")))?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| BackendError::InvalidRequest("invalid api token".to_string()))?;
            headers.insert(HeaderName::from_static(TOKEN_HEADER), value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|err| BackendError::Network(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            probe_timeout: config.probe_timeout(),
        })
    }

    fn build_url(&self, path: &str) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();

        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidRequest("invalid base url".to_string()))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));

        Ok(url)
    }

    async fn expect_success(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response, BackendError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(map_api_error(response, operation).await)
        }
    }

    async fn trigger_auth_flow(
        &self,
        provider: Provider,
        add_account: bool,
    ) -> Result<(), BackendError> {
        let mut url = self.build_url(&format!("api/v1/auth/{}/login", provider.as_str()))?;
        if add_account {
            url.query_pairs_mut().append_pair("add_account", "true");
        }

        let operation = if add_account { "add account" } else { "login" };
        let response = self.client.get(url).send().await?;
        Self::expect_success(response, operation).await?;

        info!(provider = %provider, add_account, "started browser authentication flow");
        Ok(())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn check_backend(&self) -> bool {
        let Ok(url) = self.build_url("health") else {
            return false;
        };

        match self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "backend health probe failed");
                false
            }
        }
    }

    async fn fetch_limits(&self) -> Result<LimitsResponse, BackendError> {
        let url = self.build_url("api/v1/limits")?;
        let response = self.client.get(url).send().await?;
        let response = Self::expect_success(response, "fetch limits").await?;

        let body = response.text().await?;
        let limits = serde_json::from_str::<LimitsResponse>(&body)?;

        debug!(
            providers = limits.providers.len(),
            "fetched limits from backend"
        );
        Ok(limits)
    }

    async fn refresh_limits(&self) -> Result<(), BackendError> {
        let url = self.build_url("api/v1/limits/refresh")?;
        let response = self.client.post(url).send().await?;
        Self::expect_success(response, "refresh limits").await?;
        Ok(())
    }

    async fn get_accounts(&self, provider: Provider) -> Result<Vec<Account>, BackendError> {
        let mut url = self.build_url("api/v1/accounts")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str());

        let response = self.client.get(url).send().await?;
        let response = Self::expect_success(response, "list accounts").await?;

        let body = response.text().await?;
        let accounts = serde_json::from_str::<AccountsResponse>(&body)?.accounts;

        debug!(provider = %provider, count = accounts.len(), "fetched accounts");
        Ok(accounts)
    }

    async fn activate_account(&self, account_id: &str) -> Result<(), BackendError> {
        validate_account_id(account_id)?;
        let url = self.build_url(&format!("api/v1/accounts/{account_id}/activate"))?;
        let response = self.client.post(url).send().await?;
        Self::expect_success(response, "activate account").await?;

        info!(account_id = %account_id, "activated account");
        Ok(())
    }

    async fn update_account_name(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<(), BackendError> {
        validate_account_id(account_id)?;
        let mut url = self.build_url(&format!("api/v1/accounts/{account_id}/name"))?;
        url.query_pairs_mut().append_pair("name", name);

        let response = self.client.put(url).send().await?;
        Self::expect_success(response, "rename account").await?;

        info!(account_id = %account_id, "renamed account");
        Ok(())
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), BackendError> {
        validate_account_id(account_id)?;
        let url = self.build_url(&format!("api/v1/accounts/{account_id}"))?;
        let response = self.client.delete(url).send().await?;
        Self::expect_success(response, "delete account").await?;

        info!(account_id = %account_id, "deleted account");
        Ok(())
    }

    async fn add_account(&self, provider: Provider) -> Result<(), BackendError> {
        self.trigger_auth_flow(provider, true).await
    }

    async fn login(&self, provider: Provider) -> Result<(), BackendError> {
        self.trigger_auth_flow(provider, false).await
    }

    async fn logout(&self, provider: Provider) -> Result<(), BackendError> {
        let url = self.build_url(&format!("api/v1/auth/{}/logout", provider.as_str()))?;
        let response = self.client.post(url).send().await?;
        Self::expect_success(response, "logout").await?;

        info!(provider = %provider, "logged out");
        Ok(())
    }
}
