use thiserror::Error;

use dnsgate_api::ApiError;
use dnsgate_store::StoreError;
use dnsgate_types::InvalidDomainError;

/// Every failure a controller operation can surface.
///
/// `Display` is the message placed verbatim in `{ "error": ... }` responses.
#[derive(Debug, Error)]
pub enum GateError {
    /// Not configured, unreachable, or rejected by the DNS server.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("could not determine this device's address from the query log (no matching log entry)")]
    IdentityUnresolved,

    #[error("no query logger app found on the DNS server (apps/list)")]
    NoQueryLoggerFound,

    #[error("invalid domain")]
    InvalidDomain(String),

    #[error("unknown action")]
    UnknownAction,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("corrupt persisted entry under {key}: {detail}")]
    CorruptPersistedEntry { key: String, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<InvalidDomainError> for GateError {
    fn from(err: InvalidDomainError) -> Self {
        Self::InvalidDomain(err.raw)
    }
}

pub type Result<T, E = GateError> = std::result::Result<T, E>;
