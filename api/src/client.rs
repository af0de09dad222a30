use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use dnsgate_types::{Domain, Minutes};

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::{
    AllowedListing, ApiCredentials, ApiError, ApiFut, AppsList, DnsApi, LogPage, LogQuery,
    Settings, http_client,
};

/// reqwest-backed [`DnsApi`].
///
/// Credentials are optional at construction so the daemon can start (and run
/// recovery bookkeeping) before it is configured; every call then fails with
/// [`ApiError::NotConfigured`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    credentials: Option<ApiCredentials>,
    retry: RetryConfig,
}

impl ApiClient {
    #[must_use]
    pub fn new(credentials: Option<ApiCredentials>) -> Self {
        Self {
            http: http_client().clone(),
            credentials,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn endpoint(&self, path: &str, pairs: &[(&'static str, String)]) -> Result<Url, ApiError> {
        let creds = self
            .credentials
            .as_ref()
            .filter(|c| !c.base_url.trim().is_empty() && !c.api_key.trim().is_empty())
            .ok_or(ApiError::NotConfigured)?;

        let base = creds.base_url.trim().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/api{path}")).map_err(|e| {
            tracing::warn!(base_url = %base, "Invalid API base URL: {e}");
            ApiError::NotConfigured
        })?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, value);
            }
            query.append_pair("token", &creds.api_key);
        }
        Ok(url)
    }

    /// Perform one API call and return the unwrapped `response` member.
    async fn call(&self, path: &str, pairs: &[(&'static str, String)]) -> Result<Value, ApiError> {
        let url = self.endpoint(path, pairs)?;
        tracing::debug!(path, "API request");

        let response = match send_with_retry(|| self.http.get(url.clone()), &self.retry).await {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                tracing::warn!(path, status, "API call rejected");
                return Err(ApiError::http_status(status));
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                // The URL carries the API token; never let it reach logs or callers.
                let source = source.without_url();
                tracing::warn!(path, attempts, error = %source, "API unreachable");
                return Err(ApiError::Unreachable(source.to_string()));
            }
        };

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Rejected {
                status: None,
                message: format!("invalid API response body: {}", e.without_url()),
            })?;

        if let Some(status) = body.get("status").and_then(Value::as_str)
            && status != "ok"
        {
            let message = body
                .get("errorMessage")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            tracing::warn!(path, status, "API reported failure");
            return Err(ApiError::payload(message));
        }

        Ok(body.get("response").cloned().unwrap_or(Value::Null))
    }

    async fn call_typed<T>(
        &self,
        path: &str,
        pairs: &[(&'static str, String)],
        context: &str,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Default,
    {
        let response = self.call(path, pairs).await?;
        if response.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(response).map_err(|e| ApiError::decode(context, &e))
    }
}

fn domain_pair(domain: &Domain) -> [(&'static str, String); 1] {
    [("domain", domain.as_str().to_string())]
}

impl DnsApi for ApiClient {
    fn get_settings(&self) -> ApiFut<'_, Settings> {
        Box::pin(async move { self.call_typed("/settings/get", &[], "settings").await })
    }

    fn set_blocking_enabled(&self, enabled: bool) -> ApiFut<'_, ()> {
        Box::pin(async move {
            self.call("/settings/set", &[("enableBlocking", enabled.to_string())])
                .await
                .map(drop)
        })
    }

    fn temporary_disable_blocking(&self, minutes: Minutes) -> ApiFut<'_, ()> {
        Box::pin(async move {
            self.call(
                "/settings/temporaryDisableBlocking",
                &[("minutes", minutes.get().to_string())],
            )
            .await
            .map(drop)
        })
    }

    fn list_apps(&self) -> ApiFut<'_, AppsList> {
        Box::pin(async move { self.call_typed("/apps/list", &[], "apps list").await })
    }

    fn query_logs<'a>(&'a self, query: &'a LogQuery) -> ApiFut<'a, LogPage> {
        Box::pin(async move {
            self.call_typed("/logs/query", &query.to_pairs(), "log query")
                .await
        })
    }

    fn allow_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()> {
        Box::pin(async move {
            self.call("/allowed/add", &domain_pair(domain))
                .await
                .map(drop)
        })
    }

    fn delete_allowed_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()> {
        Box::pin(async move {
            self.call("/allowed/delete", &domain_pair(domain))
                .await
                .map(drop)
        })
    }

    fn list_allowed<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, AllowedListing> {
        Box::pin(async move {
            self.call_typed("/allowed/list", &domain_pair(domain), "allowed list")
                .await
        })
    }

    fn delete_cached_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()> {
        Box::pin(async move {
            self.call("/cache/delete", &domain_pair(domain))
                .await
                .map(drop)
        })
    }
}
