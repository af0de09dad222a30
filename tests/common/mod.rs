//! Shared test utilities and fixtures
//!
//! A wiremock stand-in for the DNS server's HTTP API plus a fully wired
//! [`Dispatcher`] talking to it through the real [`ApiClient`].

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use dnsgate_api::ApiClient;
use dnsgate_api::retry::RetryConfig;
use dnsgate_core::{
    Dispatcher, IdentitySettings, ManualClock, Probe, ProbeFut, TimerService, TokioTimers,
};
use dnsgate_store::MemoryStore;
use dnsgate_types::TimerName;

pub const NOW: i64 = 1_700_000_000_000;
pub const TOKEN: &str = "test-token";
pub const CLIENT_IP: &str = "192.168.1.20";
pub const LOGGER_NAME: &str = "Query Logs (Sqlite)";
pub const LOGGER_CLASS: &str = "QueryLogsSqlite.App";

/// The probe's DNS lookup is simulated by the log-query mock, so emitting
/// does nothing.
pub struct NoopProbe;

impl Probe for NoopProbe {
    fn emit<'a>(&'a self, _host: &'a str) -> ProbeFut<'a> {
        Box::pin(async {})
    }
}

pub fn ok_body(response: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "response": response}))
}

pub fn error_body(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"status": "error", "errorMessage": message}))
}

/// Mount `GET /api<endpoint>` answering with an ok envelope.
pub async fn mount_ok(server: &MockServer, endpoint: &str, response: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api{endpoint}")))
        .and(query_param("token", TOKEN))
        .respond_with(ok_body(response))
        .mount(server)
        .await;
}

/// Mount `GET /api<endpoint>` that must be hit exactly `times` times.
pub async fn expect_ok(server: &MockServer, endpoint: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/api{endpoint}")))
        .and(query_param("token", TOKEN))
        .respond_with(ok_body(Value::Null))
        .expect(times)
        .mount(server)
        .await;
}

pub async fn mount_query_logger(server: &MockServer) {
    mount_ok(
        server,
        "/apps/list",
        json!({"apps": [
            {"name": "Geo Continent", "dnsApps": [{"classPath": "GeoContinent.App", "isQueryLogger": false}]},
            {"name": LOGGER_NAME, "dnsApps": [{"classPath": LOGGER_CLASS, "isQueryLogger": true}]}
        ]}),
    )
    .await;
}

/// Answer identity probes: any log query filtered by `qname` returns one
/// entry for that name from [`CLIENT_IP`].
pub async fn mount_probe_echo(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/logs/query"))
        .respond_with(|req: &Request| {
            let qname = req
                .url
                .query_pairs()
                .find(|(k, _)| k == "qname")
                .map(|(_, v)| v.into_owned());
            let entries = match qname {
                Some(name) => json!([{
                    "qname": name.to_uppercase(),
                    "clientIpAddress": CLIENT_IP,
                    "timestamp": "2023-11-14T22:13:20Z"
                }]),
                None => json!([]),
            };
            ok_body(json!({"entries": entries}))
        })
        .mount(server)
        .await;
}

pub fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(Some(dnsgate_api::ApiCredentials {
        base_url: server.uri(),
        api_key: TOKEN.to_string(),
    }))
    .with_retry(RetryConfig::none())
}

pub struct Fixture {
    pub server: MockServer,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub timers: Arc<TokioTimers>,
    pub fired: mpsc::UnboundedReceiver<TimerName>,
    pub dispatcher: Dispatcher,
}

impl Fixture {
    pub async fn start() -> Self {
        Self::with_store(MemoryStore::new()).await
    }

    pub async fn with_store(store: MemoryStore) -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(NOW));
        let (timers, fired) = TokioTimers::new(clock.clone());
        let timers = Arc::new(timers);
        let dispatcher = Dispatcher::new(
            Arc::new(client_for(&server)),
            store.clone(),
            timers.clone() as Arc<dyn TimerService>,
            clock.clone(),
            Arc::new(NoopProbe),
            IdentitySettings {
                settle: std::time::Duration::from_millis(1),
                ..IdentitySettings::default()
            },
        );
        Self {
            server,
            store,
            clock,
            timers,
            fired,
            dispatcher,
        }
    }

    pub async fn send(&self, request: Value) -> Value {
        self.dispatcher.handle_json(&request.to_string()).await
    }

    /// Paths (without the `/api` prefix) the mock has seen, in order.
    pub async fn hits(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.url.path().trim_start_matches("/api").to_string())
            .collect()
    }

    /// Query parameter `key` of every request made to `endpoint`.
    pub async fn params(&self, endpoint: &str, key: &str) -> Vec<String> {
        let full = format!("/api{endpoint}");
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == full)
            .filter_map(|r| {
                r.url
                    .query_pairs()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.into_owned())
            })
            .collect()
    }
}
