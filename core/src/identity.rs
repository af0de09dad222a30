//! Works out this device's address as the DNS server sees it.
//!
//! The server never reports the caller's address directly, so the resolver
//! emits a request for a unique throwaway name and then looks that name up in
//! the server's own query log. The matching log row carries the client address.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Value, json};

use dnsgate_api::{DnsApi, LogEntry, LogQuery};
use dnsgate_store::{Record, StateStore};
use dnsgate_types::{CachedClientIdentity, EpochMillis};

use crate::clock::Clock;
use crate::errors::{GateError, Result};
use crate::keys::{CLIENT_IP_ADDRESS, CLIENT_IP_DETECTED_AT};
use crate::logger::QueryLoggerDiscovery;

const LOOKBACK_SECS: i64 = 30;
const PROBE_PAGE_SIZE: u32 = 10;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub type ProbeFut<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Emits the side-channel request. The outcome is irrelevant; only the DNS
/// lookup it triggers matters.
pub trait Probe: Send + Sync {
    fn emit<'a>(&'a self, host: &'a str) -> ProbeFut<'a>;
}

/// Fires an HTTPS GET at the probe host.
pub struct HttpsProbe {
    http: reqwest::Client,
}

impl HttpsProbe {
    #[must_use]
    pub fn new() -> Self {
        let http = dnsgate_api::http_client_with_timeout(PROBE_TIMEOUT).unwrap_or_else(|e| {
            tracing::warn!("Failed to build probe HTTP client: {e}. Using defaults.");
            reqwest::Client::new()
        });
        Self { http }
    }
}

impl Default for HttpsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for HttpsProbe {
    fn emit<'a>(&'a self, host: &'a str) -> ProbeFut<'a> {
        Box::pin(async move {
            match self.http.get(format!("https://{host}/")).send().await {
                Ok(response) => {
                    tracing::debug!(host, status = %response.status(), "Probe answered");
                }
                Err(e) => tracing::debug!(host, error = %e, "Probe failed (expected)"),
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Zone the probe label is placed under.
    pub probe_zone: String,
    /// Wait before each log lookup.
    pub settle: Duration,
    /// Log lookups before giving up.
    pub attempts: u32,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            probe_zone: "example.com".to_string(),
            settle: Duration::from_millis(600),
            attempts: 3,
        }
    }
}

pub struct IdentityResolver {
    api: Arc<dyn DnsApi>,
    store: Arc<dyn StateStore>,
    logger: Arc<QueryLoggerDiscovery>,
    probe: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
    settings: IdentitySettings,
}

impl IdentityResolver {
    pub fn new(
        api: Arc<dyn DnsApi>,
        store: Arc<dyn StateStore>,
        logger: Arc<QueryLoggerDiscovery>,
        probe: Arc<dyn Probe>,
        clock: Arc<dyn Clock>,
        settings: IdentitySettings,
    ) -> Self {
        Self {
            api,
            store,
            logger,
            probe,
            clock,
            settings,
        }
    }

    /// The cached address while fresh, otherwise a new probe round.
    pub async fn resolve_client_address(&self) -> Result<String> {
        if let Some(cached) = self.cached().await?
            && cached.is_fresh(self.clock.now_ms())
        {
            return Ok(cached.address);
        }

        let label = probe_label(self.clock.now_ms(), &self.settings.probe_zone);
        self.probe.emit(&label).await;
        let logger = self.logger.discover().await?;

        for attempt in 1..=self.settings.attempts.max(1) {
            tokio::time::sleep(self.settings.settle).await;

            let end = to_datetime(self.clock.now_ms());
            let query = LogQuery::new(&logger.app_name, &logger.capability_path)
                .entries_per_page(PROBE_PAGE_SIZE)
                .between(end - TimeDelta::seconds(LOOKBACK_SECS), end)
                .qname(&label);
            let page = self.api.query_logs(&query).await?;

            if let Some(address) = find_probe_client(&page.entries, &label) {
                self.remember(&address).await?;
                tracing::info!(address = %address, attempt, "Resolved client address");
                return Ok(address);
            }
            tracing::debug!(attempt, label = %label, "Probe not in query log yet");
        }

        Err(GateError::IdentityUnresolved)
    }

    /// Drop the cached address.
    pub async fn forget(&self) -> Result<()> {
        self.store
            .remove(&[CLIENT_IP_ADDRESS, CLIENT_IP_DETECTED_AT])
            .await?;
        Ok(())
    }

    async fn cached(&self) -> Result<Option<CachedClientIdentity>> {
        let record = self
            .store
            .get(&[CLIENT_IP_ADDRESS, CLIENT_IP_DETECTED_AT])
            .await?;
        let address = record
            .get(CLIENT_IP_ADDRESS)
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty());
        let resolved_at = record.get(CLIENT_IP_DETECTED_AT).and_then(Value::as_i64);
        Ok(match (address, resolved_at) {
            (Some(address), Some(resolved_at)) => Some(CachedClientIdentity {
                address: address.to_string(),
                resolved_at,
            }),
            _ => None,
        })
    }

    async fn remember(&self, address: &str) -> Result<()> {
        let mut record = Record::new();
        record.insert(CLIENT_IP_ADDRESS.into(), json!(address));
        record.insert(CLIENT_IP_DETECTED_AT.into(), json!(self.clock.now_ms()));
        self.store.set(record).await?;
        Ok(())
    }
}

/// `ttip-<epoch ms>-<random hex>.<zone>`, unique per call.
fn probe_label(now: EpochMillis, zone: &str) -> String {
    format!("ttip-{now}-{:x}.{zone}", rand::random::<u64>())
}

fn find_probe_client(entries: &[LogEntry], label: &str) -> Option<String> {
    entries
        .iter()
        .filter(|e| {
            e.qname
                .as_deref()
                .is_some_and(|q| q.trim_end_matches('.').eq_ignore_ascii_case(label))
        })
        .find_map(|e| e.client_ip_address.clone().filter(|a| !a.is_empty()))
}

fn to_datetime(ms: EpochMillis) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
