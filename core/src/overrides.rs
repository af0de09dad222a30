//! Temporary blocking disable and per-domain temporary allowances.
//!
//! The store is the only source of truth for what is scheduled. Live timers
//! are a cache of it: [`OverrideManager::recover`] rebuilds them from the
//! persisted deadlines at every start, and timer events are re-checked against
//! the store before they act.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use dnsgate_api::DnsApi;
use dnsgate_store::StateStore;
use dnsgate_types::{Domain, EpochMillis, Minutes, TimerName};

use crate::clock::Clock;
use crate::errors::{GateError, Result};
use crate::keys::{BLOCKING_TEMP_UNTIL, TEMP_ALLOW_STATE};
use crate::timer::TimerService;

/// Timer events this close to their persisted deadline count as due.
const FIRE_TOLERANCE_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempDisable {
    pub temp_until: EpochMillis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempAllow {
    pub domain: Domain,
    pub expires_ts: EpochMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingStatus {
    pub enable_blocking: bool,
    pub temp_until: Option<EpochMillis>,
}

/// What a recovery pass found and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Re-armed temporary-disable deadline.
    pub blocking_until: Option<EpochMillis>,
    /// A past-due temporary-disable deadline was cleared.
    pub blocking_cleared: bool,
    pub rescheduled: Vec<Domain>,
    pub expired: Vec<Domain>,
    /// Past-due allowances whose remote revocation failed; kept for next time.
    pub retained: Vec<Domain>,
    pub dropped_corrupt: usize,
}

#[derive(Debug, Default)]
struct TempAllowState {
    entries: BTreeMap<Domain, EpochMillis>,
    dropped_corrupt: usize,
}

pub struct OverrideManager {
    api: Arc<dyn DnsApi>,
    store: Arc<dyn StateStore>,
    timers: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
    /// Serializes every read-modify-write of the persisted schedule.
    state_lock: Mutex<()>,
}

impl OverrideManager {
    pub fn new(
        api: Arc<dyn DnsApi>,
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            store,
            timers,
            clock,
            state_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> Result<BlockingStatus> {
        let settings = self.api.get_settings().await?;
        let temp_until = self
            .store
            .get_one(BLOCKING_TEMP_UNTIL)
            .await?
            .as_ref()
            .and_then(decode_deadline);
        Ok(BlockingStatus {
            enable_blocking: settings.enable_blocking,
            temp_until,
        })
    }

    /// Manual enable or disable. Ends any temporary disable on success.
    pub async fn set_blocking(&self, enabled: bool) -> Result<()> {
        self.api.set_blocking_enabled(enabled).await?;
        self.cancel_temporary_disable().await
    }

    /// Disable blocking on the server for `minutes` and arm the local
    /// re-enable timer. A second call replaces the first.
    pub async fn disable_blocking_for(&self, minutes: Minutes) -> Result<TempDisable> {
        let _guard = self.state_lock.lock().await;

        self.api.temporary_disable_blocking(minutes).await?;
        let until = self.clock.now_ms() + minutes.as_millis();
        self.store.set_one(BLOCKING_TEMP_UNTIL, json!(until)).await?;

        self.timers.cancel(&TimerName::ReEnableBlocking);
        self.timers.schedule(&TimerName::ReEnableBlocking, until);
        tracing::info!(minutes = minutes.get(), until_ms = until, "Blocking temporarily disabled");
        Ok(TempDisable { temp_until: until })
    }

    pub async fn cancel_temporary_disable(&self) -> Result<()> {
        let _guard = self.state_lock.lock().await;
        self.store.remove(&[BLOCKING_TEMP_UNTIL]).await?;
        self.timers.cancel(&TimerName::ReEnableBlocking);
        Ok(())
    }

    /// The re-enable timer fired. Without a persisted deadline the event is
    /// ignored. A deadline still in the future is re-armed, since the timer
    /// has already dropped its schedule. Otherwise blocking is re-enabled and
    /// the deadline is cleared even when the server call fails.
    pub async fn on_blocking_timer_fired(&self) -> Result<()> {
        let _guard = self.state_lock.lock().await;

        let now = self.clock.now_ms();
        let deadline = self
            .store
            .get_one(BLOCKING_TEMP_UNTIL)
            .await?
            .as_ref()
            .and_then(decode_deadline);
        match deadline {
            None => {
                tracing::debug!(now, "Ignoring re-enable timer with no pending disable");
                return Ok(());
            }
            Some(until) if until > now + FIRE_TOLERANCE_MS => {
                tracing::debug!(until_ms = until, now, "Re-enable timer fired early; re-arming");
                self.timers.schedule(&TimerName::ReEnableBlocking, until);
                return Ok(());
            }
            Some(_) => {}
        }

        if let Err(e) = self.api.set_blocking_enabled(true).await {
            tracing::error!(error = %e, "Re-enabling blocking after timer failed");
        } else {
            tracing::info!("Blocking re-enabled after temporary disable");
        }
        self.store.remove(&[BLOCKING_TEMP_UNTIL]).await?;
        Ok(())
    }

    /// Allow `domain` for `minutes`. Nothing is recorded locally unless the
    /// server accepted the allow-list entry.
    pub async fn allow_domain_temporarily(
        &self,
        domain: &Domain,
        minutes: Minutes,
    ) -> Result<TempAllow> {
        let _guard = self.state_lock.lock().await;

        self.api.allow_zone(domain).await?;
        self.evict_cached(domain).await;

        let expires = self.clock.now_ms() + minutes.as_millis();
        let mut state = self.load_temp_allow().await?;
        state.entries.insert(domain.clone(), expires);
        self.save_temp_allow(&state.entries).await?;

        let timer = TimerName::TempAllow(domain.clone());
        self.timers.cancel(&timer);
        self.timers.schedule(&timer, expires);
        tracing::info!(%domain, minutes = minutes.get(), expires_ms = expires, "Domain temporarily allowed");
        Ok(TempAllow {
            domain: domain.clone(),
            expires_ts: expires,
        })
    }

    /// Revoke a temporary allowance. Calling it again is harmless.
    pub async fn expire_temp_allow(&self, domain: &Domain) -> Result<()> {
        let _guard = self.state_lock.lock().await;
        self.revoke_remote(domain).await?;
        self.forget_temp_allow(domain).await
    }

    /// A per-domain timer fired. Early events re-arm the timer at the
    /// persisted deadline. A failed revocation is logged and the entry stays
    /// persisted until the next recovery pass.
    pub async fn on_temp_allow_timer_fired(&self, domain: &Domain) -> Result<()> {
        let _guard = self.state_lock.lock().await;

        let now = self.clock.now_ms();
        let state = self.load_temp_allow().await?;
        match state.entries.get(domain) {
            None => {
                tracing::debug!(%domain, now, "Ignoring temp-allow timer with no entry");
                return Ok(());
            }
            Some(&expires) if expires > now + FIRE_TOLERANCE_MS => {
                tracing::debug!(%domain, expires_ms = expires, now, "Temp-allow timer fired early; re-arming");
                self.timers.schedule(&TimerName::TempAllow(domain.clone()), expires);
                return Ok(());
            }
            Some(_) => {}
        }

        if let Err(e) = self.revoke_remote(domain).await {
            tracing::error!(%domain, error = %e, "Temp allow cleanup failed; retrying at next start");
            self.timers.cancel(&TimerName::TempAllow(domain.clone()));
            return Ok(());
        }
        self.forget_temp_allow(domain).await?;
        tracing::info!(%domain, "Temporary allowance expired");
        Ok(())
    }

    /// Dispatch a fired timer to its handler.
    pub async fn on_timer(&self, name: &TimerName) -> Result<()> {
        match name {
            TimerName::ReEnableBlocking => self.on_blocking_timer_fired().await,
            TimerName::TempAllow(domain) => self.on_temp_allow_timer_fired(domain).await,
        }
    }

    /// Permanent allow-list add.
    pub async fn allow_domain(&self, domain: &Domain) -> Result<()> {
        self.api.allow_zone(domain).await?;
        self.evict_cached(domain).await;
        tracing::info!(%domain, "Domain allowed");
        Ok(())
    }

    /// Permanent allow-list removal. Also ends a temporary allowance for the
    /// same domain.
    pub async fn remove_allow_domain(&self, domain: &Domain) -> Result<()> {
        let _guard = self.state_lock.lock().await;
        self.revoke_remote(domain).await?;
        self.forget_temp_allow(domain).await?;
        tracing::info!(%domain, "Domain removed from allow list");
        Ok(())
    }

    /// Rebuild every live timer from the store. Run once per start, before
    /// anything else is served.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let _guard = self.state_lock.lock().await;
        let now = self.clock.now_ms();
        let mut report = RecoveryReport::default();

        self.timers.cancel(&TimerName::ReEnableBlocking);
        if let Some(raw) = self.store.get_one(BLOCKING_TEMP_UNTIL).await? {
            match decode_deadline(&raw) {
                Some(until) if until <= now => {
                    // The server re-enables on its own once its timeout elapses.
                    self.store.remove(&[BLOCKING_TEMP_UNTIL]).await?;
                    report.blocking_cleared = true;
                    tracing::info!(until_ms = until, "Cleared past-due temporary disable");
                }
                Some(until) => {
                    self.timers.schedule(&TimerName::ReEnableBlocking, until);
                    report.blocking_until = Some(until);
                }
                None => {
                    self.store.remove(&[BLOCKING_TEMP_UNTIL]).await?;
                    report.dropped_corrupt += 1;
                    let err = corrupt(BLOCKING_TEMP_UNTIL.to_string(), &raw);
                    tracing::warn!(error = %err, "Dropped corrupt temporary-disable deadline");
                }
            }
        }

        let mut state = self.load_temp_allow().await?;
        report.dropped_corrupt += state.dropped_corrupt;
        let mut reconciled = BTreeMap::new();
        for (domain, expires) in std::mem::take(&mut state.entries) {
            let timer = TimerName::TempAllow(domain.clone());
            self.timers.cancel(&timer);

            if expires > now {
                self.timers.schedule(&timer, expires);
                reconciled.insert(domain.clone(), expires);
                report.rescheduled.push(domain);
                continue;
            }

            match self.revoke_remote(&domain).await {
                Ok(()) => {
                    tracing::info!(%domain, "Expired temporary allowance during recovery");
                    report.expired.push(domain);
                }
                Err(e) => {
                    tracing::warn!(%domain, error = %e, "Temp allow cleanup at startup failed");
                    reconciled.insert(domain.clone(), expires);
                    report.retained.push(domain);
                }
            }
        }
        self.save_temp_allow(&reconciled).await?;

        tracing::info!(
            rescheduled = report.rescheduled.len(),
            expired = report.expired.len(),
            retained = report.retained.len(),
            dropped_corrupt = report.dropped_corrupt,
            "Recovery complete"
        );
        Ok(report)
    }

    async fn revoke_remote(&self, domain: &Domain) -> Result<()> {
        self.api.delete_allowed_zone(domain).await?;
        self.evict_cached(domain).await;
        Ok(())
    }

    /// Drop the local entry and its timer. Caller holds `state_lock`.
    async fn forget_temp_allow(&self, domain: &Domain) -> Result<()> {
        let mut state = self.load_temp_allow().await?;
        if state.entries.remove(domain).is_some() || state.dropped_corrupt > 0 {
            self.save_temp_allow(&state.entries).await?;
        }
        self.timers.cancel(&TimerName::TempAllow(domain.clone()));
        Ok(())
    }

    async fn evict_cached(&self, domain: &Domain) {
        if let Err(e) = self.api.delete_cached_zone(domain).await {
            tracing::debug!(%domain, error = %e, "Cache eviction failed");
        }
    }

    async fn load_temp_allow(&self) -> Result<TempAllowState> {
        let raw = self.store.get_one(TEMP_ALLOW_STATE).await?;
        Ok(decode_temp_allow(raw))
    }

    async fn save_temp_allow(&self, entries: &BTreeMap<Domain, EpochMillis>) -> Result<()> {
        let map: Map<String, Value> = entries
            .iter()
            .map(|(domain, expires)| (domain.to_string(), json!(expires)))
            .collect();
        self.store.set_one(TEMP_ALLOW_STATE, Value::Object(map)).await?;
        Ok(())
    }
}

/// Epoch-millis deadline. Fractional numbers are floored; anything else is
/// corrupt.
fn decode_deadline(value: &Value) -> Option<EpochMillis> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64))
}

fn corrupt(key: String, value: &Value) -> GateError {
    GateError::CorruptPersistedEntry {
        key,
        detail: value.to_string(),
    }
}

fn decode_temp_allow(raw: Option<Value>) -> TempAllowState {
    let mut state = TempAllowState::default();
    let map = match raw {
        None | Some(Value::Null) => return state,
        Some(Value::Object(map)) => map,
        Some(other) => {
            let err = corrupt(TEMP_ALLOW_STATE.to_string(), &other);
            tracing::warn!(error = %err, "Dropped corrupt temp-allow state");
            state.dropped_corrupt = 1;
            return state;
        }
    };

    for (key, value) in map {
        match (Domain::normalize(&key), decode_deadline(&value)) {
            (Some(domain), Some(expires)) => {
                let slot = state.entries.entry(domain).or_insert(expires);
                *slot = (*slot).max(expires);
            }
            _ => {
                let err = corrupt(format!("{TEMP_ALLOW_STATE}.{key}"), &value);
                tracing::warn!(error = %err, "Dropped corrupt temp-allow entry");
                state.dropped_corrupt += 1;
            }
        }
    }
    state
}
