//! Allow-status batches against the real client.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{Fixture, TOKEN, ok_body};

async fn mount_listing(fx: &Fixture, domain: &str, records: usize) {
    let records: Vec<_> = (0..records).map(|_| json!({"type": "A"})).collect();
    Mock::given(method("GET"))
        .and(path("/api/allowed/list"))
        .and(query_param("domain", domain))
        .and(query_param("token", TOKEN))
        .respond_with(ok_body(json!({
            "domain": domain,
            "zones": [],
            "records": records
        })))
        .mount(&fx.server)
        .await;
}

#[tokio::test]
async fn disabled_feature_makes_no_lookups() {
    let fx = Fixture::start().await;

    let resp = fx
        .send(json!({"action": "allowedStatusBatch", "domains": ["a.example", "b.example"]}))
        .await;

    assert_eq!(resp, json!({"ok": true, "enabled": false, "allowed": {}}));
    assert!(fx.hits().await.is_empty());
}

#[tokio::test]
async fn reports_each_distinct_domain() {
    let fx = Fixture::start().await;
    fx.send(json!({"action": "setOptions", "showAllowStatus": true}))
        .await;
    mount_listing(&fx, "a.example", 1).await;
    mount_listing(&fx, "b.example", 0).await;
    Mock::given(method("GET"))
        .and(path("/api/allowed/list"))
        .and(query_param("domain", "c.example"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fx.server)
        .await;

    let resp = fx
        .send(json!({
            "action": "allowedStatusBatch",
            "domains": ["a.example", "A.EXAMPLE.", "b.example", "c.example", 7, ""]
        }))
        .await;

    assert_eq!(
        resp,
        json!({"ok": true, "enabled": true, "allowed": {
            "a.example": true,
            "b.example": false,
            "c.example": false
        }})
    );
    assert_eq!(fx.params("/allowed/list", "domain").await.len(), 3);
}

#[tokio::test]
async fn large_batches_finish_with_bounded_concurrency() {
    let fx = Fixture::start().await;
    fx.send(json!({"action": "setOptions", "showAllowStatus": true}))
        .await;
    Mock::given(method("GET"))
        .and(path("/api/allowed/list"))
        .respond_with(
            ok_body(json!({"domain": "x", "records": [{"type": "A"}]}))
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&fx.server)
        .await;

    let domains: Vec<String> = (0..40).map(|i| format!("host{i}.example")).collect();
    let resp = fx
        .send(json!({"action": "allowedStatusBatch", "domains": domains}))
        .await;

    let allowed = resp["allowed"].as_object().unwrap();
    assert_eq!(allowed.len(), 40);
    assert!(allowed.values().all(|v| v == &json!(true)));
    assert_eq!(fx.hits().await.len(), 40);
}
