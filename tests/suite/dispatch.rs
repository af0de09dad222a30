//! The message protocol end to end.

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::Mock;

use dnsgate_core::keys::{CLIENT_IP_ADDRESS, QUERY_LOGGER_APP};

use crate::common::{
    CLIENT_IP, Fixture, LOGGER_CLASS, LOGGER_NAME, error_body, mount_ok, mount_probe_echo,
    mount_query_logger, ok_body,
};

#[tokio::test]
async fn status_combines_server_flag_and_local_deadline() {
    let fx = Fixture::start().await;
    mount_ok(&fx.server, "/settings/get", json!({"enableBlocking": false})).await;

    assert_eq!(
        fx.send(json!({"action": "status"})).await,
        json!({"ok": true, "enableBlocking": false, "tempUntil": null})
    );
}

#[tokio::test]
async fn server_error_message_is_returned_verbatim() {
    let fx = Fixture::start().await;
    Mock::given(method("GET"))
        .and(path("/api/settings/set"))
        .respond_with(error_body("Invalid token or session expired."))
        .mount(&fx.server)
        .await;

    assert_eq!(
        fx.send(json!({"action": "disable"})).await,
        json!({"error": "Invalid token or session expired."})
    );
}

#[tokio::test]
async fn unknown_action_and_invalid_domain() {
    let fx = Fixture::start().await;

    assert_eq!(
        fx.send(json!({"action": "flushEverything"})).await,
        json!({"error": "unknown action"})
    );
    assert_eq!(
        fx.send(json!({"action": "allowDomain", "domain": "  "})).await,
        json!({"error": "invalid domain"})
    );
    assert!(fx.hits().await.is_empty());
}

#[tokio::test]
async fn allow_and_remove_evict_the_cache() {
    let fx = Fixture::start().await;
    mount_ok(&fx.server, "/allowed/add", Value::Null).await;
    mount_ok(&fx.server, "/allowed/delete", Value::Null).await;
    mount_ok(&fx.server, "/cache/delete", Value::Null).await;

    assert_eq!(
        fx.send(json!({"action": "allowDomain", "domain": "Tracker.Example."}))
            .await,
        json!({"ok": true})
    );
    assert_eq!(
        fx.send(json!({"action": "removeAllowDomain", "domain": "tracker.example"}))
            .await,
        json!({"ok": true})
    );

    assert_eq!(
        fx.hits().await,
        vec!["/allowed/add", "/cache/delete", "/allowed/delete", "/cache/delete"]
    );
    assert_eq!(
        fx.params("/cache/delete", "domain").await,
        vec!["tracker.example", "tracker.example"]
    );
}

#[tokio::test]
async fn blocked_list_probes_identity_then_ranks_blocked_queries() {
    let fx = Fixture::start().await;
    mount_query_logger(&fx.server).await;
    Mock::given(method("GET"))
        .and(path("/api/logs/query"))
        .and(query_param("responseType", "Blocked"))
        .and(query_param("clientIpAddress", CLIENT_IP))
        .and(query_param("entriesPerPage", "300"))
        .respond_with(ok_body(json!({"entries": [
            {"qname": "ads.example", "timestamp": "2023-11-14T22:10:00Z"},
            {"qname": "Ads.Example.", "timestamp": "2023-11-14T22:12:00Z"},
            {"qname": "pixel.example", "timestamp": "2023-11-14T22:11:00Z"},
            {"qname": "", "timestamp": null}
        ]})))
        .with_priority(1)
        .mount(&fx.server)
        .await;
    mount_probe_echo(&fx.server).await;

    let resp = fx.send(json!({"action": "blockedList", "seconds": 60})).await;

    assert_eq!(
        resp,
        json!({"ok": true, "items": [
            {"domain": "ads.example", "count": 2, "lastSeen": "2023-11-14T22:12:00Z"},
            {"domain": "pixel.example", "count": 1, "lastSeen": "2023-11-14T22:11:00Z"}
        ]})
    );

    let snapshot = fx.store.snapshot();
    assert_eq!(snapshot[CLIENT_IP_ADDRESS], json!(CLIENT_IP));
    assert_eq!(
        snapshot[QUERY_LOGGER_APP],
        json!({"name": LOGGER_NAME, "classPath": LOGGER_CLASS})
    );

    // The second request reuses both cached lookups.
    fx.send(json!({"action": "blockedList"})).await;
    let hits = fx.hits().await;
    assert_eq!(hits.iter().filter(|h| *h == "/apps/list").count(), 1);
    assert_eq!(fx.params("/logs/query", "qname").await.len(), 1);
}

#[tokio::test]
async fn blocked_list_honours_explicit_range() {
    let fx = Fixture::start().await;
    mount_query_logger(&fx.server).await;
    Mock::given(method("GET"))
        .and(path("/api/logs/query"))
        .and(query_param("responseType", "Blocked"))
        .and(query_param("start", "2025-03-01T09:00:00.000Z"))
        .and(query_param("end", "2025-03-01T10:00:00.000Z"))
        .respond_with(ok_body(json!({"entries": []})))
        .with_priority(1)
        .expect(1)
        .mount(&fx.server)
        .await;
    mount_probe_echo(&fx.server).await;

    let resp = fx
        .send(json!({
            "action": "blockedList",
            "startIso": "2025-03-01T09:00:00Z",
            "endIso": "2025-03-01T11:00:00+01:00"
        }))
        .await;

    assert_eq!(resp, json!({"ok": true, "items": []}));
}

#[tokio::test]
async fn blocked_list_without_query_logger_fails() {
    let fx = Fixture::start().await;
    mount_ok(&fx.server, "/apps/list", json!({"apps": []})).await;

    let resp = fx.send(json!({"action": "blockedList"})).await;

    assert!(
        resp["error"]
            .as_str()
            .unwrap()
            .starts_with("no query logger app found")
    );
}

#[tokio::test]
async fn options_persist_and_feed_defaults() {
    let fx = Fixture::start().await;
    mount_ok(&fx.server, "/allowed/add", Value::Null).await;
    mount_ok(&fx.server, "/cache/delete", Value::Null).await;

    let saved = fx
        .send(json!({"action": "setOptions", "tempAllowMinutes": 9999.5}))
        .await;
    assert_eq!(saved["tempAllowMinutes"], json!(1440));

    let resp = fx
        .send(json!({"action": "tempAllowDomain", "domain": "cdn.example"}))
        .await;
    assert_eq!(
        resp,
        json!({"ok": true, "domain": "cdn.example", "expiresTs": crate::common::NOW + 1440 * 60_000})
    );
}

#[tokio::test]
async fn unconfigured_client_reports_missing_credentials() {
    let fx = Fixture::start().await;
    let dispatcher = dnsgate_core::Dispatcher::new(
        std::sync::Arc::new(dnsgate_api::ApiClient::new(None)),
        fx.store.clone(),
        fx.timers.clone(),
        fx.clock.clone(),
        std::sync::Arc::new(crate::common::NoopProbe),
        dnsgate_core::IdentitySettings::default(),
    );

    let resp = dispatcher.handle_json(r#"{"action":"status"}"#).await;

    assert_eq!(
        resp,
        json!({"error": "DNS server API is not configured (missing base URL or API token)"})
    );
}
