//! "Is this domain on the allow list?" for many domains at once.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use serde::Serialize;

use dnsgate_api::{AllowedListing, DnsApi};
use dnsgate_store::StateStore;
use dnsgate_types::Domain;

use crate::errors::Result;
use crate::options::load_options;

/// Concurrent lookups per batch.
pub const ALLOW_STATUS_WORKERS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowStatusBatch {
    /// `false` when the feature is switched off; `allowed` is then empty.
    pub enabled: bool,
    pub allowed: BTreeMap<String, bool>,
}

pub struct AllowStatusChecker {
    api: Arc<dyn DnsApi>,
    store: Arc<dyn StateStore>,
}

impl AllowStatusChecker {
    pub fn new(api: Arc<dyn DnsApi>, store: Arc<dyn StateStore>) -> Self {
        Self { api, store }
    }

    /// Gated by the `showAllowStatus` option: when off, no lookups are made.
    pub async fn check_allow_status(&self, domains: &[String]) -> Result<AllowStatusBatch> {
        let options = load_options(self.store.as_ref()).await?;
        if !options.show_allow_status {
            return Ok(AllowStatusBatch::default());
        }
        Ok(check_batch(self.api.as_ref(), domains, ALLOW_STATUS_WORKERS).await)
    }
}

/// One lookup per distinct normalized domain, spread over at most `workers`
/// concurrent lookups. Workers pull the next index from a shared cursor, so a
/// slow lookup never leaves the others idle. A failed lookup reads as `false`.
pub async fn check_batch(api: &dyn DnsApi, domains: &[String], workers: usize) -> AllowStatusBatch {
    let mut seen = HashSet::new();
    let unique: Vec<Domain> = domains
        .iter()
        .filter_map(|raw| Domain::normalize(raw))
        .filter(|d| seen.insert(d.clone()))
        .collect();

    let cursor = AtomicUsize::new(0);
    let results = Mutex::new(BTreeMap::new());

    let worker = || async {
        loop {
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(domain) = unique.get(index) else {
                break;
            };
            let allowed = match api.list_allowed(domain).await {
                Ok(listing) => is_allowed(domain, &listing),
                Err(e) => {
                    tracing::debug!(%domain, error = %e, "Allow lookup failed");
                    false
                }
            };
            results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(domain.to_string(), allowed);
        }
    };

    let pool = workers.max(1).min(unique.len());
    join_all((0..pool).map(|_| worker())).await;

    AllowStatusBatch {
        enabled: true,
        allowed: results.into_inner().unwrap_or_else(PoisonError::into_inner),
    }
}

/// `/allowed/list` is a zone browser, not an existence check: any listing
/// with records or zones counts as allowed. The reported zone name is only
/// logged when it does not contain the queried name; it never changes the
/// answer.
#[must_use]
pub fn is_allowed(domain: &Domain, listing: &AllowedListing) -> bool {
    let allowed = listing.has_entries();
    if allowed
        && !listing
            .domain
            .as_deref()
            .is_some_and(|zone| zone.to_lowercase().contains(domain.as_str()))
    {
        tracing::debug!(%domain, reported = ?listing.domain, "Allow listing names a different zone");
    }
    allowed
}
