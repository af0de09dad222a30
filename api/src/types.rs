//! Response payloads and request builders.
//!
//! Payloads are parsed leniently: missing or `null` collections become empty,
//! and unparseable timestamps become `None`, so one odd log row never fails a
//! whole page.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Subset of `/settings/get` the controller reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub enable_blocking: bool,
}

/// `/apps/list` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppsList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub apps: Vec<InstalledApp>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dns_apps: Vec<DnsAppCapability>,
}

/// One capability class declared by an installed app.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsAppCapability {
    #[serde(default, deserialize_with = "null_as_default")]
    pub class_path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_query_logger: bool,
}

/// `/logs/query` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: Vec<LogEntry>,
}

/// One row of the query log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub qname: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_ip_address: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(qname: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            qname: Some(qname.into()),
            timestamp,
            client_ip_address: None,
        }
    }
}

/// `/allowed/list` payload.
///
/// The endpoint is a zone browser, not an existence check: it echoes the
/// closest allowed zone it knows, or the root, together with whatever records or
/// child zones it found.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllowedListing {
    #[serde(default, deserialize_with = "null_as_default")]
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "array_or_empty")]
    pub records: Vec<Value>,
    #[serde(default, deserialize_with = "array_or_empty")]
    pub zones: Vec<Value>,
}

impl AllowedListing {
    #[must_use]
    pub fn has_entries(&self) -> bool {
        !self.records.is_empty() || !self.zones.is_empty()
    }
}

/// Response classification filter for log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Authoritative,
    Recursive,
    Cached,
    Blocked,
    UpstreamBlocked,
    CacheBlocked,
}

impl ResponseType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authoritative => "Authoritative",
            Self::Recursive => "Recursive",
            Self::Cached => "Cached",
            Self::Blocked => "Blocked",
            Self::UpstreamBlocked => "UpstreamBlocked",
            Self::CacheBlocked => "CacheBlocked",
        }
    }
}

/// Filters for `/logs/query`.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub app_name: String,
    pub class_path: String,
    pub page_number: u32,
    pub entries_per_page: u32,
    pub descending: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub client_ip_address: Option<String>,
    pub response_type: Option<ResponseType>,
    pub qname: Option<String>,
}

impl LogQuery {
    /// A query against the given logger with the server's usual paging defaults.
    #[must_use]
    pub fn new(app_name: impl Into<String>, class_path: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            class_path: class_path.into(),
            page_number: 1,
            entries_per_page: 50,
            descending: true,
            start: None,
            end: None,
            client_ip_address: None,
            response_type: None,
            qname: None,
        }
    }

    pub fn entries_per_page(mut self, n: u32) -> Self {
        self.entries_per_page = n;
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn client(mut self, address: impl Into<String>) -> Self {
        self.client_ip_address = Some(address.into());
        self
    }

    pub fn response_type(mut self, kind: ResponseType) -> Self {
        self.response_type = Some(kind);
        self
    }

    pub fn qname(mut self, qname: impl Into<String>) -> Self {
        self.qname = Some(qname.into());
        self
    }

    pub(crate) fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(10);
        if !self.app_name.is_empty() {
            pairs.push(("name", self.app_name.clone()));
        }
        if !self.class_path.is_empty() {
            pairs.push(("classPath", self.class_path.clone()));
        }
        pairs.push(("pageNumber", self.page_number.to_string()));
        pairs.push(("entriesPerPage", self.entries_per_page.to_string()));
        pairs.push(("descendingOrder", self.descending.to_string()));
        if let Some(start) = self.start {
            pairs.push(("start", iso_millis(start)));
        }
        if let Some(end) = self.end {
            pairs.push(("end", iso_millis(end)));
        }
        if let Some(ip) = &self.client_ip_address {
            pairs.push(("clientIpAddress", ip.clone()));
        }
        if let Some(kind) = self.response_type {
            pairs.push(("responseType", kind.as_str().to_string()));
        }
        if let Some(qname) = &self.qname {
            pairs.push(("qname", qname.clone()));
        }
        pairs
    }
}

fn iso_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn array_or_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Value::Number(n)) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    })
}
