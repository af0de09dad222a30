//! In-process [`DnsApi`] fake for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dnsgate_api::{
    AllowedListing, ApiError, ApiFut, AppsList, DnsApi, DnsAppCapability, InstalledApp, LogEntry,
    LogPage, LogQuery, Settings,
};
use dnsgate_types::{Domain, Minutes};

/// Records every call as `"<method> <arg>"` and fails the methods named via
/// [`FakeApi::fail`].
#[derive(Default)]
pub(crate) struct FakeApi {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    pub apps: Mutex<AppsList>,
    /// Fixed log page. `None` echoes the query's qname with [`Self::client_ip`].
    pub logs: Mutex<Option<LogPage>>,
    pub client_ip: Mutex<Option<String>>,
    pub allowed: Mutex<HashMap<String, AllowedListing>>,
    pub blocking: AtomicBool,
    pub lookup_delay: Mutex<Option<Duration>>,
    pub allow_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeApi {
    pub fn with_query_logger() -> Self {
        let api = Self::default();
        *lock(&api.apps) = AppsList {
            apps: vec![
                InstalledApp {
                    name: "Split Horizon".to_string(),
                    dns_apps: vec![DnsAppCapability {
                        class_path: "SplitHorizon.App".to_string(),
                        is_query_logger: false,
                    }],
                },
                InstalledApp {
                    name: "Query Logs (Sqlite)".to_string(),
                    dns_apps: vec![DnsAppCapability {
                        class_path: "QueryLogsSqlite.App".to_string(),
                        is_query_logger: true,
                    }],
                },
            ],
        };
        *lock(&api.client_ip) = Some("192.168.1.20".to_string());
        api
    }

    pub fn fail(&self, method: &'static str) {
        lock(&self.failing).insert(method);
    }

    pub fn heal(&self, method: &'static str) {
        lock(&self.failing).remove(method);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, method: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .count()
    }

    fn record(&self, method: &'static str, arg: impl std::fmt::Display) -> Result<(), ApiError> {
        let arg = arg.to_string();
        let entry = if arg.is_empty() {
            method.to_string()
        } else {
            format!("{method} {arg}")
        };
        lock(&self.calls).push(entry);
        if lock(&self.failing).contains(method) {
            return Err(ApiError::Unreachable(format!("{method} failed")));
        }
        Ok(())
    }
}

impl DnsApi for FakeApi {
    fn get_settings(&self) -> ApiFut<'_, Settings> {
        Box::pin(async move {
            self.record("get_settings", "")?;
            Ok(Settings {
                enable_blocking: self.blocking.load(Ordering::SeqCst),
            })
        })
    }

    fn set_blocking_enabled(&self, enabled: bool) -> ApiFut<'_, ()> {
        Box::pin(async move {
            self.record("set_blocking_enabled", enabled)?;
            self.blocking.store(enabled, Ordering::SeqCst);
            Ok(())
        })
    }

    fn temporary_disable_blocking(&self, minutes: Minutes) -> ApiFut<'_, ()> {
        Box::pin(async move { self.record("temporary_disable_blocking", minutes.get()) })
    }

    fn list_apps(&self) -> ApiFut<'_, AppsList> {
        Box::pin(async move {
            self.record("list_apps", "")?;
            Ok(lock(&self.apps).clone())
        })
    }

    fn query_logs<'a>(&'a self, query: &'a LogQuery) -> ApiFut<'a, LogPage> {
        Box::pin(async move {
            self.record("query_logs", query.qname.as_deref().unwrap_or(""))?;
            if let Some(page) = lock(&self.logs).clone() {
                return Ok(page);
            }
            let entries = match (&query.qname, lock(&self.client_ip).clone()) {
                (Some(qname), Some(ip)) => vec![LogEntry {
                    qname: Some(qname.to_uppercase()),
                    timestamp: None,
                    client_ip_address: Some(ip),
                }],
                _ => Vec::new(),
            };
            Ok(LogPage { entries })
        })
    }

    fn allow_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()> {
        Box::pin(async move {
            let delay = *lock(&self.allow_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.record("allow_zone", domain)
        })
    }

    fn delete_allowed_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()> {
        Box::pin(async move { self.record("delete_allowed_zone", domain) })
    }

    fn list_allowed<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, AllowedListing> {
        Box::pin(async move {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            let delay = *lock(&self.lookup_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.record("list_allowed", domain)?;
            Ok(lock(&self.allowed)
                .get(domain.as_str())
                .cloned()
                .unwrap_or_default())
        })
    }

    fn delete_cached_zone<'a>(&'a self, domain: &'a Domain) -> ApiFut<'a, ()> {
        Box::pin(async move { self.record("delete_cached_zone", domain) })
    }
}
