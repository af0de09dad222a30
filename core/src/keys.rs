//! Store keys. Existing state files depend on these exact spellings.

pub const BLOCKING_TEMP_UNTIL: &str = "blockingTempUntil";
pub const TEMP_ALLOW_STATE: &str = "tempAllowState";
pub const CLIENT_IP_ADDRESS: &str = "clientIpAddress";
pub const CLIENT_IP_DETECTED_AT: &str = "clientIpDetectedAt";
pub const QUERY_LOGGER_APP: &str = "queryLoggerApp";
pub const TEMP_ALLOW_MINUTES: &str = "tempAllowMinutes";
pub const LOG_WINDOW_SECONDS: &str = "logWindowSeconds";
pub const SHOW_ALLOW_STATUS: &str = "showAllowStatus";
