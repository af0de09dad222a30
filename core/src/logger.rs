//! Finds the installed app that exposes the DNS query log.

use std::sync::Arc;

use dnsgate_api::{AppsList, DnsApi};
use dnsgate_store::StateStore;
use dnsgate_types::QueryLoggerRef;

use crate::errors::{GateError, Result};
use crate::keys::QUERY_LOGGER_APP;

/// Cached without expiry once found; [`QueryLoggerDiscovery::invalidate`]
/// forces a fresh scan, e.g. after the logger app was reinstalled.
pub struct QueryLoggerDiscovery {
    api: Arc<dyn DnsApi>,
    store: Arc<dyn StateStore>,
}

impl QueryLoggerDiscovery {
    pub fn new(api: Arc<dyn DnsApi>, store: Arc<dyn StateStore>) -> Self {
        Self { api, store }
    }

    pub async fn discover(&self) -> Result<QueryLoggerRef> {
        if let Some(cached) = self.cached().await? {
            return Ok(cached);
        }

        let apps = self.api.list_apps().await?;
        let found = first_query_logger(&apps).ok_or(GateError::NoQueryLoggerFound)?;
        tracing::info!(app = %found.app_name, class_path = %found.capability_path, "Discovered query logger");

        let value = serde_json::to_value(&found).map_err(dnsgate_store::StoreError::from)?;
        self.store.set_one(QUERY_LOGGER_APP, value).await?;
        Ok(found)
    }

    pub async fn invalidate(&self) -> Result<()> {
        self.store.remove(&[QUERY_LOGGER_APP]).await?;
        tracing::debug!("Query logger cache cleared");
        Ok(())
    }

    async fn cached(&self) -> Result<Option<QueryLoggerRef>> {
        let Some(raw) = self.store.get_one(QUERY_LOGGER_APP).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_value::<QueryLoggerRef>(raw)
            .ok()
            .filter(QueryLoggerRef::is_complete))
    }
}

fn first_query_logger(apps: &AppsList) -> Option<QueryLoggerRef> {
    apps.apps.iter().find_map(|app| {
        app.dns_apps
            .iter()
            .filter(|cap| cap.is_query_logger)
            .map(|cap| QueryLoggerRef {
                app_name: app.name.clone(),
                capability_path: cap.class_path.clone(),
            })
            .find(QueryLoggerRef::is_complete)
    })
}
