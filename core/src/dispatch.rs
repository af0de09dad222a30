//! Request routing for the UI-facing message protocol.
//!
//! Requests are JSON objects tagged by `action`. Every response is either
//! `{ "ok": true, ...payload }` or `{ "error": "<message>" }`.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use dnsgate_api::{DnsApi, LogQuery, ResponseType};
use dnsgate_store::StateStore;
use dnsgate_types::{Domain, Minutes, OptionsPatch, TimerName};

use crate::aggregate::aggregate_blocked;
use crate::allow_status::AllowStatusChecker;
use crate::clock::Clock;
use crate::errors::{GateError, Result};
use crate::identity::{IdentityResolver, IdentitySettings, Probe};
use crate::logger::QueryLoggerDiscovery;
use crate::options::{load_options, save_options};
use crate::overrides::{OverrideManager, RecoveryReport};
use crate::timer::TimerService;

const DEFAULT_TEMP_DISABLE_MINUTES: u32 = 5;
const BLOCKED_PAGE_SIZE: u32 = 300;
const MIN_BLOCKED_WINDOW_SECS: f64 = 10.0;

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    Status,
    Enable,
    Disable,
    TempDisable {
        #[serde(default)]
        minutes: Option<f64>,
    },
    /// Either an explicit `startIso`/`endIso` range or the last `seconds`.
    BlockedList {
        #[serde(default)]
        seconds: Option<f64>,
        #[serde(default)]
        start_iso: Option<String>,
        #[serde(default)]
        end_iso: Option<String>,
    },
    AllowDomain {
        #[serde(default)]
        domain: Option<String>,
    },
    RemoveAllowDomain {
        #[serde(default)]
        domain: Option<String>,
    },
    TempAllowDomain {
        #[serde(default)]
        domain: Option<String>,
        #[serde(default)]
        minutes: Option<f64>,
    },
    AllowedStatusBatch {
        /// Anything other than an array of strings counts as no domains.
        #[serde(default)]
        domains: Value,
    },
    GetOptions,
    SetOptions(OptionsPatch),
    ResetCaches,
}

impl Request {
    pub const ACTIONS: [&'static str; 12] = [
        "status",
        "enable",
        "disable",
        "tempDisable",
        "blockedList",
        "allowDomain",
        "removeAllowDomain",
        "tempAllowDomain",
        "allowedStatusBatch",
        "getOptions",
        "setOptions",
        "resetCaches",
    ];

    /// Parse a request, reporting unrecognized actions as
    /// [`GateError::UnknownAction`].
    pub fn from_value(value: Value) -> Result<Self> {
        let known = value
            .get("action")
            .and_then(Value::as_str)
            .is_some_and(|action| Self::ACTIONS.contains(&action));
        if !known {
            return Err(GateError::UnknownAction);
        }
        serde_json::from_value(value).map_err(|e| GateError::InvalidRequest(e.to_string()))
    }
}

/// Owns every component and routes requests and timer events to them.
pub struct Dispatcher {
    api: Arc<dyn DnsApi>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    overrides: OverrideManager,
    logger: Arc<QueryLoggerDiscovery>,
    identity: IdentityResolver,
    allow_status: AllowStatusChecker,
}

impl Dispatcher {
    pub fn new(
        api: Arc<dyn DnsApi>,
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerService>,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn Probe>,
        identity_settings: IdentitySettings,
    ) -> Self {
        let logger = Arc::new(QueryLoggerDiscovery::new(
            Arc::clone(&api),
            Arc::clone(&store),
        ));
        Self {
            overrides: OverrideManager::new(
                Arc::clone(&api),
                Arc::clone(&store),
                timers,
                Arc::clone(&clock),
            ),
            identity: IdentityResolver::new(
                Arc::clone(&api),
                Arc::clone(&store),
                Arc::clone(&logger),
                probe,
                Arc::clone(&clock),
                identity_settings,
            ),
            allow_status: AllowStatusChecker::new(Arc::clone(&api), Arc::clone(&store)),
            logger,
            api,
            store,
            clock,
        }
    }

    /// Rebuild timers from the store. Call before serving anything else.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.overrides.recover().await
    }

    /// Handle one raw protocol line.
    pub async fn handle_json(&self, line: &str) -> Value {
        let parsed = serde_json::from_str::<Value>(line)
            .map_err(|e| GateError::InvalidRequest(e.to_string()))
            .and_then(Request::from_value);
        match parsed {
            Ok(request) => self.handle(request).await,
            Err(e) => error_response(&e),
        }
    }

    pub async fn handle(&self, request: Request) -> Value {
        match self.route(request).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Request failed");
                error_response(&e)
            }
        }
    }

    /// Route a fired timer. Failures are logged; the persisted state decides
    /// what recovery does next time.
    pub async fn on_timer(&self, name: &TimerName) {
        if let Err(e) = self.overrides.on_timer(name).await {
            tracing::error!(timer = %name, error = %e, "Timer handler failed");
        }
    }

    async fn route(&self, request: Request) -> Result<Value> {
        match request {
            Request::Status => ok_with(&self.overrides.status().await?),
            Request::Enable => {
                self.overrides.set_blocking(true).await?;
                Ok(ok())
            }
            Request::Disable => {
                self.overrides.set_blocking(false).await?;
                Ok(ok())
            }
            Request::TempDisable { minutes } => {
                let minutes = Minutes::from_request(minutes, DEFAULT_TEMP_DISABLE_MINUTES);
                ok_with(&self.overrides.disable_blocking_for(minutes).await?)
            }
            Request::BlockedList {
                seconds,
                start_iso,
                end_iso,
            } => self.blocked_list(seconds, start_iso, end_iso).await,
            Request::AllowDomain { domain } => {
                self.overrides.allow_domain(&parse_domain(domain)?).await?;
                Ok(ok())
            }
            Request::RemoveAllowDomain { domain } => {
                self.overrides
                    .remove_allow_domain(&parse_domain(domain)?)
                    .await?;
                Ok(ok())
            }
            Request::TempAllowDomain { domain, minutes } => {
                let domain = parse_domain(domain)?;
                let options = load_options(self.store.as_ref()).await?;
                let minutes = Minutes::from_request(minutes, options.temp_allow_minutes);
                ok_with(
                    &self
                        .overrides
                        .allow_domain_temporarily(&domain, minutes)
                        .await?,
                )
            }
            Request::AllowedStatusBatch { domains } => {
                let domains = string_list(&domains);
                ok_with(&self.allow_status.check_allow_status(&domains).await?)
            }
            Request::GetOptions => ok_with(&load_options(self.store.as_ref()).await?),
            Request::SetOptions(patch) => {
                ok_with(&save_options(self.store.as_ref(), &patch).await?)
            }
            Request::ResetCaches => {
                self.logger.invalidate().await?;
                self.identity.forget().await?;
                Ok(ok())
            }
        }
    }

    /// Blocked queries from this device over the requested window, ranked.
    async fn blocked_list(
        &self,
        seconds: Option<f64>,
        start_iso: Option<String>,
        end_iso: Option<String>,
    ) -> Result<Value> {
        let client = self.identity.resolve_client_address().await?;
        let logger = self.logger.discover().await?;

        let (start, end) = match (non_blank(start_iso), non_blank(end_iso)) {
            (Some(start), Some(end)) => (parse_instant(&start)?, parse_instant(&end)?),
            _ => {
                let default = load_options(self.store.as_ref()).await?.log_window_seconds;
                let window = seconds
                    .filter(|s| s.is_finite() && *s != 0.0)
                    .map_or(f64::from(default), f64::floor)
                    .clamp(MIN_BLOCKED_WINDOW_SECS, f64::from(u32::MAX));
                let end = DateTime::from_timestamp_millis(self.clock.now_ms())
                    .unwrap_or_else(Utc::now);
                (end - TimeDelta::seconds(window as i64), end)
            }
        };

        let query = LogQuery::new(logger.app_name, logger.capability_path)
            .entries_per_page(BLOCKED_PAGE_SIZE)
            .between(start, end)
            .client(client)
            .response_type(ResponseType::Blocked);
        let page = self.api.query_logs(&query).await?;
        let items = aggregate_blocked(&page.entries);
        tracing::debug!(entries = page.entries.len(), domains = items.len(), "Blocked list built");
        Ok(json!({ "ok": true, "items": items }))
    }
}

fn ok() -> Value {
    json!({ "ok": true })
}

/// `{ "ok": true }` merged with the fields of `payload`.
fn ok_with<T: Serialize>(payload: &T) -> Result<Value> {
    let value = serde_json::to_value(payload).map_err(dnsgate_store::StoreError::from)?;
    let mut body = Map::new();
    body.insert("ok".to_string(), Value::Bool(true));
    if let Value::Object(fields) = value {
        body.extend(fields);
    }
    Ok(Value::Object(body))
}

fn error_response(err: &GateError) -> Value {
    json!({ "error": err.to_string() })
}

fn parse_domain(raw: Option<String>) -> Result<Domain> {
    Ok(Domain::parse(raw.as_deref().unwrap_or_default())?)
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GateError::InvalidRequest(format!("bad timestamp {raw:?}: {e}")))
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
