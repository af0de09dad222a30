//! Core domain types for dnsgate.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod options;
mod timer;

pub use options::{
    LOG_WINDOW_SECONDS_RANGE, Options, OptionsPatch, TEMP_ALLOW_MINUTES_RANGE, clamp_option,
};
pub use timer::{TEMP_ALLOW_PREFIX, TIMER_REENABLE_BLOCKING, TimerName};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;

// ============================================================================
// Domain names
// ============================================================================

/// A domain name in canonical form: trimmed, lowercase, without a trailing dot.
///
/// Every persisted key and every timer name is derived from this form, so two
/// spellings of the same name (`Example.COM.` and `example.com`) always map to
/// the same entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid domain: {raw:?}")]
pub struct InvalidDomainError {
    pub raw: String,
}

impl Domain {
    /// Normalize a raw query name: trim, lowercase, drop one trailing dot.
    ///
    /// Returns `None` when nothing is left or when the name contains inner
    /// whitespace. Blocked-query aggregation skips such names entirely.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        let name = lowered.strip_suffix('.').unwrap_or(&lowered);
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(name.to_string()))
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidDomainError> {
        Self::normalize(raw).ok_or_else(|| InvalidDomainError {
            raw: raw.to_string(),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Domain {
    type Error = InvalidDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.0
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Durations
// ============================================================================

/// A strictly positive number of minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Minutes(u32);

#[derive(Debug, Error)]
#[error("minutes must be at least 1")]
pub struct ZeroMinutesError;

impl Minutes {
    pub fn new(value: u32) -> Result<Self, ZeroMinutesError> {
        if value == 0 {
            Err(ZeroMinutesError)
        } else {
            Ok(Self(value))
        }
    }

    /// Build from an untrusted request value: floor it, and fall back to
    /// `default` when absent, zero, or not finite. Always at least one minute.
    #[must_use]
    pub fn from_request(raw: Option<f64>, default: u32) -> Self {
        let value = raw
            .filter(|v| v.is_finite() && *v != 0.0)
            .map_or(default, |v| v.floor().min(f64::from(u32::MAX)) as u32);
        Self(value.max(1))
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0 as i64 * MILLIS_PER_MINUTE
    }
}

impl TryFrom<u32> for Minutes {
    type Error = ZeroMinutesError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Minutes> for u32 {
    fn from(value: Minutes) -> Self {
        value.0
    }
}

// ============================================================================
// Cached lookups
// ============================================================================

/// How long a resolved client address stays usable.
pub const CLIENT_IDENTITY_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// The caller's externally visible address as last observed in the query log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedClientIdentity {
    pub address: String,
    pub resolved_at: EpochMillis,
}

impl CachedClientIdentity {
    #[must_use]
    pub fn is_fresh(&self, now: EpochMillis) -> bool {
        now.saturating_sub(self.resolved_at) < CLIENT_IDENTITY_TTL_MS
    }
}

/// Which installed app exposes the query log, and under which class path.
///
/// Persisted as `{ "name": ..., "classPath": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLoggerRef {
    #[serde(rename = "name")]
    pub app_name: String,
    #[serde(rename = "classPath")]
    pub capability_path: String,
}

impl QueryLoggerRef {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.app_name.is_empty() && !self.capability_path.is_empty()
    }
}

// ============================================================================
// Derived views
// ============================================================================

/// One row of the blocked-domains list shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedDomainSummary {
    pub domain: String,
    pub count: u32,
    pub last_seen: Option<DateTime<Utc>>,
}
