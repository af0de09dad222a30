use thiserror::Error;

/// Failure of a single API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Base URL or API token is missing.
    #[error("DNS server API is not configured (missing base URL or API token)")]
    NotConfigured,

    /// The request never produced an HTTP response.
    #[error("DNS server API is unreachable: {0}")]
    Unreachable(String),

    /// Non-success HTTP status, or an error-flagged payload.
    #[error("{message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },
}

impl ApiError {
    pub(crate) fn http_status(status: u16) -> Self {
        Self::Rejected {
            status: Some(status),
            message: format!("API HTTP error ({status})"),
        }
    }

    pub(crate) fn payload(message: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "DNS server API error".to_string());
        Self::Rejected {
            status: None,
            message,
        }
    }

    pub(crate) fn decode(context: &str, err: &serde_json::Error) -> Self {
        Self::Rejected {
            status: None,
            message: format!("unexpected {context} response: {err}"),
        }
    }

    /// HTTP status of a rejected call, when the rejection came from the transport layer.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => *status,
            _ => None,
        }
    }
}
