//! Client for the DNS server's HTTP API.
//!
//! # Architecture
//!
//! - [`DnsApi`] - Object-safe trait covering every endpoint the controller uses.
//!   Higher layers only ever hold an `Arc<dyn DnsApi>`, which keeps them testable
//!   against in-process fakes.
//! - [`ApiClient`] - The reqwest implementation.
//! - [`retry`] - Transport-level retry with exponential backoff.
//! - [`types`] - Response payloads and the log query builder.
//!
//! # Wire format
//!
//! Every call is a `GET {base_url}/api{path}?...&token={api_key}`. The server
//! answers `{ "status": "ok", "response": {...} }` on success and
//! `{ "status": "error", "errorMessage": "..." }` on application-level failure,
//! usually with HTTP 200. Both layers of failure surface as [`ApiError`].

mod client;
mod error;
pub mod retry;
pub mod types;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use dnsgate_types::{Domain, Minutes};

pub use client::ApiClient;
pub use error::ApiError;
pub use types::{
    AllowedListing, AppsList, DnsAppCapability, InstalledApp, LogEntry, LogPage, LogQuery,
    ResponseType, Settings,
};

pub use dnsgate_types;

/// Future returned by every [`DnsApi`] call.
pub type ApiFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Where the API lives and how to authenticate against it.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub base_url: String,
    pub api_key: String,
}

// Manual Debug impl to prevent leaking the token in logs.
impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Remote operations the controller depends on.
pub trait DnsApi: Send + Sync {
    fn get_settings(&self) -> ApiFut<'_, Settings>;

    fn set_blocking_enabled(&self, enabled: bool) -> ApiFut<'_, ()>;

    /// Server-side temporary disable. The server re-enables on its own when the
    /// timeout elapses.
    fn temporary_disable_blocking(&self, minutes: Minutes) -> ApiFut<'_, ()>;

    fn list_apps(&self) -> ApiFut<'_, AppsList>;

    fn query_logs<'a>(&'a self, query: &'a LogQuery) -> ApiFut<'a, LogPage>;

    fn allow_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()>;

    fn delete_allowed_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()>;

    fn list_allowed<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, AllowedListing>;

    fn delete_cached_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()>;
}

/// Shared HTTP client for API calls.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("Failed to build configured HTTP client: {e}. Using defaults.");
            reqwest::Client::new()
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

pub fn http_client_with_timeout(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    base_client_builder().timeout(timeout).build()
}
