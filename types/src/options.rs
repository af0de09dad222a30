//! User-tunable options persisted alongside the scheduler state.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const TEMP_ALLOW_MINUTES_RANGE: RangeInclusive<u32> = 1..=1440;
pub const LOG_WINDOW_SECONDS_RANGE: RangeInclusive<u32> = 10..=3600;

const DEFAULT_TEMP_ALLOW_MINUTES: u32 = 30;
const DEFAULT_LOG_WINDOW_SECONDS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Default duration of a temporary allowance.
    pub temp_allow_minutes: u32,
    /// Default look-back window for the blocked-domains list.
    pub log_window_seconds: u32,
    /// Feature flag for the allow-status batch checker.
    pub show_allow_status: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            temp_allow_minutes: DEFAULT_TEMP_ALLOW_MINUTES,
            log_window_seconds: DEFAULT_LOG_WINDOW_SECONDS,
            show_allow_status: false,
        }
    }
}

/// A partial update coming from the options surface.
///
/// Numbers arrive untrusted (possibly fractional or out of range) and are
/// clamped by [`Options::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsPatch {
    #[serde(default)]
    pub temp_allow_minutes: Option<f64>,
    #[serde(default)]
    pub log_window_seconds: Option<f64>,
    #[serde(default)]
    pub show_allow_status: Option<bool>,
}

impl Options {
    #[must_use]
    pub fn apply(mut self, patch: &OptionsPatch) -> Self {
        if let Some(raw) = patch.temp_allow_minutes {
            self.temp_allow_minutes =
                clamp_option(raw, &TEMP_ALLOW_MINUTES_RANGE, DEFAULT_TEMP_ALLOW_MINUTES);
        }
        if let Some(raw) = patch.log_window_seconds {
            self.log_window_seconds =
                clamp_option(raw, &LOG_WINDOW_SECONDS_RANGE, DEFAULT_LOG_WINDOW_SECONDS);
        }
        if let Some(flag) = patch.show_allow_status {
            self.show_allow_status = flag;
        }
        self
    }
}

/// Floor `raw` and clamp it into `range`; non-finite input yields `fallback`.
#[must_use]
pub fn clamp_option(raw: f64, range: &RangeInclusive<u32>, fallback: u32) -> u32 {
    if !raw.is_finite() {
        return fallback;
    }
    let floored = raw.floor();
    if floored < f64::from(*range.start()) {
        *range.start()
    } else if floored > f64::from(*range.end()) {
        *range.end()
    } else {
        floored as u32
    }
}
