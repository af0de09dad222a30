//! User options kept in the state store.
//!
//! Values are read leniently: a key holding the wrong JSON type reads as the
//! default. Writes always go through [`Options::apply`], so stored numbers are
//! already clamped.

use serde_json::{Value, json};

use dnsgate_store::{Record, StateStore, StoreError};
use dnsgate_types::{
    LOG_WINDOW_SECONDS_RANGE, Options, OptionsPatch, TEMP_ALLOW_MINUTES_RANGE, clamp_option,
};

use crate::keys::{LOG_WINDOW_SECONDS, SHOW_ALLOW_STATUS, TEMP_ALLOW_MINUTES};

const OPTION_KEYS: [&str; 3] = [TEMP_ALLOW_MINUTES, LOG_WINDOW_SECONDS, SHOW_ALLOW_STATUS];

pub async fn load_options(store: &dyn StateStore) -> Result<Options, StoreError> {
    let record = store.get(&OPTION_KEYS).await?;
    Ok(from_record(&record))
}

/// Apply `patch` on top of the stored options and persist the result.
pub async fn save_options(
    store: &dyn StateStore,
    patch: &OptionsPatch,
) -> Result<Options, StoreError> {
    let next = load_options(store).await?.apply(patch);
    store.set(to_record(&next)).await?;
    Ok(next)
}

/// Write configured defaults for options the store does not hold yet.
pub async fn seed_options(store: &dyn StateStore, seed: &OptionsPatch) -> Result<(), StoreError> {
    let present = store.get(&OPTION_KEYS).await?;
    let seeded = Options::default().apply(seed);
    let mut missing = to_record(&seeded);
    missing.retain(|key, _| !present.contains_key(key));
    if missing.is_empty() {
        return Ok(());
    }
    tracing::debug!(keys = ?missing.keys().collect::<Vec<_>>(), "Seeding options");
    store.set(missing).await
}

fn from_record(record: &Record) -> Options {
    let defaults = Options::default();
    let number = |key: &str| record.get(key).and_then(Value::as_f64);
    Options {
        temp_allow_minutes: number(TEMP_ALLOW_MINUTES).map_or(defaults.temp_allow_minutes, |v| {
            clamp_option(v, &TEMP_ALLOW_MINUTES_RANGE, defaults.temp_allow_minutes)
        }),
        log_window_seconds: number(LOG_WINDOW_SECONDS).map_or(defaults.log_window_seconds, |v| {
            clamp_option(v, &LOG_WINDOW_SECONDS_RANGE, defaults.log_window_seconds)
        }),
        show_allow_status: record
            .get(SHOW_ALLOW_STATUS)
            .and_then(Value::as_bool)
            .unwrap_or(defaults.show_allow_status),
    }
}

fn to_record(options: &Options) -> Record {
    let mut record = Record::new();
    record.insert(TEMP_ALLOW_MINUTES.into(), json!(options.temp_allow_minutes));
    record.insert(LOG_WINDOW_SECONDS.into(), json!(options.log_window_seconds));
    record.insert(SHOW_ALLOW_STATUS.into(), json!(options.show_allow_status));
    record
}
