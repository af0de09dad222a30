//! Restart recovery and timer-driven expiry.

use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use dnsgate_core::keys::{BLOCKING_TEMP_UNTIL, TEMP_ALLOW_STATE};
use dnsgate_store::MemoryStore;
use dnsgate_types::{Domain, TimerName};

use crate::common::{Fixture, NOW, expect_ok, mount_ok};

fn persisted(entries: Value) -> MemoryStore {
    let Value::Object(record) = entries else {
        panic!("fixture must be an object");
    };
    MemoryStore::with_record(record)
}

fn domain(name: &str) -> Domain {
    Domain::parse(name).unwrap()
}

#[tokio::test]
async fn recovery_rearms_future_deadlines_and_revokes_past_ones() {
    let fx = Fixture::with_store(persisted(json!({
        BLOCKING_TEMP_UNTIL: NOW + 600_000,
        TEMP_ALLOW_STATE: {
            "past.example": NOW - 1_000,
            "future.example": NOW + 60_000,
            "broken.example": "soon",
        },
    })))
    .await;
    expect_ok(&fx.server, "/allowed/delete", 1).await;
    mount_ok(&fx.server, "/cache/delete", Value::Null).await;

    let report = fx.dispatcher.recover().await.unwrap();

    assert_eq!(report.blocking_until, Some(NOW + 600_000));
    assert_eq!(report.expired, vec![domain("past.example")]);
    assert_eq!(report.rescheduled, vec![domain("future.example")]);
    assert_eq!(report.dropped_corrupt, 1);

    assert_eq!(
        fx.timers.deadline(&TimerName::ReEnableBlocking),
        Some(NOW + 600_000)
    );
    assert_eq!(
        fx.timers
            .deadline(&TimerName::TempAllow(domain("future.example"))),
        Some(NOW + 60_000)
    );
    assert_eq!(
        fx.store.snapshot()[TEMP_ALLOW_STATE],
        json!({"future.example": NOW + 60_000})
    );
    assert_eq!(
        fx.params("/allowed/delete", "domain").await,
        vec!["past.example"]
    );
}

#[tokio::test]
async fn past_due_temp_disable_is_cleared_without_remote_calls() {
    let fx = Fixture::with_store(persisted(json!({ BLOCKING_TEMP_UNTIL: NOW - 1 }))).await;

    let report = fx.dispatcher.recover().await.unwrap();

    assert!(report.blocking_cleared);
    assert!(fx.store.snapshot().get(BLOCKING_TEMP_UNTIL).is_none());
    assert!(fx.timers.pending().is_empty());
    assert!(fx.hits().await.is_empty());
}

#[tokio::test]
async fn failed_expiry_is_retained_and_retried_at_next_recovery() {
    let fx = Fixture::start().await;
    mount_ok(&fx.server, "/allowed/add", Value::Null).await;
    mount_ok(&fx.server, "/cache/delete", Value::Null).await;

    let resp = fx
        .send(json!({"action": "tempAllowDomain", "domain": "ads.example", "minutes": 1}))
        .await;
    assert_eq!(resp["expiresTs"], json!(NOW + 60_000));

    Mock::given(method("GET"))
        .and(path("/api/allowed/delete"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;

    fx.clock.advance(60_000);
    fx.dispatcher
        .on_timer(&TimerName::TempAllow(domain("ads.example")))
        .await;

    assert_eq!(
        fx.store.snapshot()[TEMP_ALLOW_STATE],
        json!({"ads.example": NOW + 60_000})
    );
    assert!(fx.timers.pending().is_empty());

    expect_ok(&fx.server, "/allowed/delete", 1).await;
    let report = fx.dispatcher.recover().await.unwrap();

    assert_eq!(report.expired, vec![domain("ads.example")]);
    assert_eq!(fx.store.snapshot()[TEMP_ALLOW_STATE], json!({}));
}

#[tokio::test]
async fn reenable_timer_turns_blocking_back_on() {
    let fx = Fixture::start().await;
    Mock::given(method("GET"))
        .and(path("/api/settings/temporaryDisableBlocking"))
        .and(query_param("minutes", "5"))
        .respond_with(crate::common::ok_body(Value::Null))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/settings/set"))
        .and(query_param("enableBlocking", "true"))
        .respond_with(crate::common::ok_body(Value::Null))
        .expect(1)
        .mount(&fx.server)
        .await;

    let resp = fx.send(json!({"action": "tempDisable"})).await;
    assert_eq!(resp, json!({"ok": true, "tempUntil": NOW + 300_000}));

    // An early fire re-arms at the persisted deadline instead of acting.
    fx.dispatcher.on_timer(&TimerName::ReEnableBlocking).await;
    assert!(fx.store.snapshot().contains_key(BLOCKING_TEMP_UNTIL));
    assert_eq!(
        fx.timers.deadline(&TimerName::ReEnableBlocking),
        Some(NOW + 300_000)
    );

    fx.clock.advance(300_000);
    fx.dispatcher.on_timer(&TimerName::ReEnableBlocking).await;

    assert!(!fx.store.snapshot().contains_key(BLOCKING_TEMP_UNTIL));
}

#[tokio::test]
async fn rearmed_timer_is_delivered() {
    let mut fx =
        Fixture::with_store(persisted(json!({ TEMP_ALLOW_STATE: {"soon.example": NOW + 50} })))
            .await;

    fx.dispatcher.recover().await.unwrap();

    let fired = tokio::time::timeout(Duration::from_secs(5), fx.fired.recv())
        .await
        .expect("timer should fire")
        .expect("timer channel open");
    assert_eq!(fired, TimerName::TempAllow(domain("soon.example")));
}

#[tokio::test]
async fn manual_enable_cancels_temporary_disable() {
    let fx = Fixture::start().await;
    mount_ok(&fx.server, "/settings/temporaryDisableBlocking", Value::Null).await;
    mount_ok(&fx.server, "/settings/set", Value::Null).await;

    fx.send(json!({"action": "tempDisable", "minutes": 10})).await;
    assert!(fx.timers.deadline(&TimerName::ReEnableBlocking).is_some());

    assert_eq!(fx.send(json!({"action": "enable"})).await, json!({"ok": true}));

    assert!(fx.timers.pending().is_empty());
    assert!(!fx.store.snapshot().contains_key(BLOCKING_TEMP_UNTIL));
}
