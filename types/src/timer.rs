use std::fmt;

use crate::Domain;

pub const TIMER_REENABLE_BLOCKING: &str = "reEnableBlocking";
pub const TEMP_ALLOW_PREFIX: &str = "tempAllow::";

/// Name of a scheduled wake-up.
///
/// Names are deterministic: scheduling the same name again replaces the
/// previous schedule instead of adding a second one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerName {
    /// Re-enable blocking after a temporary disable.
    ReEnableBlocking,
    /// Revoke a temporary allowance for one domain.
    TempAllow(Domain),
}

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReEnableBlocking => f.write_str(TIMER_REENABLE_BLOCKING),
            Self::TempAllow(domain) => write!(f, "{TEMP_ALLOW_PREFIX}{domain}"),
        }
    }
}
