//! Service-specific error types

use serde::Serialize;
use thiserror::Error;

/// Proxy service errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind listener: {0}")]
    ListenerBind(String),

    #[error("Upstream timeout after {0}s")]
    UpstreamTimeout(u64),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("no accounts available in pool")]
    NoAccounts,

    #[error("all accounts in the pool are exhausted")]
    AllExhausted,
}

/// Result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an upstream response, carried alongside the retry loop
/// in the forwarder. Mirrors spec's classifier output exactly; `Ok` never
/// appears here since it short-circuits the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamClassification {
    RateLimited,
    QuotaExceeded,
    CapacityExhausted,
    ModelNotFound,
    Unauthenticated,
    /// Anything else: surfaced to the client as-is.
    Upstream(u16),
}

impl UpstreamClassification {
    pub fn rotate_reason(self) -> Option<account_pool::RotateReason> {
        match self {
            UpstreamClassification::RateLimited => Some(account_pool::RotateReason::RateLimited),
            UpstreamClassification::QuotaExceeded => Some(account_pool::RotateReason::QuotaExhausted),
            UpstreamClassification::CapacityExhausted => {
                Some(account_pool::RotateReason::CapacityExhausted)
            }
            UpstreamClassification::ModelNotFound => Some(account_pool::RotateReason::ModelNotFound),
            UpstreamClassification::Unauthenticated => None, // triggers pool.refresh(), not rotate()
            UpstreamClassification::Upstream(_) => None,
        }
    }
}

/// Classify an upstream HTTP response per spec's classification table.
pub fn classify(status: u16, body: &str) -> UpstreamClassification {
    match status {
        429 => UpstreamClassification::RateLimited,
        403 => {
            if body.contains("RESOURCE_EXHAUSTED") || body.to_lowercase().contains("quota") {
                UpstreamClassification::QuotaExceeded
            } else {
                UpstreamClassification::Upstream(403)
            }
        }
        503 => {
            if body.contains("CAPACITY_EXHAUSTED") || body.to_lowercase().contains("capacity") {
                UpstreamClassification::CapacityExhausted
            } else {
                UpstreamClassification::Upstream(503)
            }
        }
        404 => UpstreamClassification::ModelNotFound,
        401 => UpstreamClassification::Unauthenticated,
        other => UpstreamClassification::Upstream(other),
    }
}

/// Client-facing error kind, used to shape the JSON payload on §7's table.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorType {
    AuthenticationError,
    RateLimitError,
    ServerError,
    UpstreamError,
    InvalidRequestError,
}

#[derive(Debug, Serialize)]
pub struct ClientErrorBody {
    pub error: ClientErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ClientErrorDetail {
    #[serde(rename = "type")]
    pub error_type: ClientErrorType,
    pub message: String,
}

impl ClientErrorBody {
    pub fn new(error_type: ClientErrorType, message: impl Into<String>) -> Self {
        Self {
            error: ClientErrorDetail {
                error_type,
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit() {
        assert_eq!(classify(429, ""), UpstreamClassification::RateLimited);
    }

    #[test]
    fn classifies_quota_exhausted_by_body() {
        assert_eq!(
            classify(403, "RESOURCE_EXHAUSTED: quota exceeded"),
            UpstreamClassification::QuotaExceeded
        );
        assert_eq!(
            classify(403, "Quota for this project has been exceeded"),
            UpstreamClassification::QuotaExceeded
        );
    }

    #[test]
    fn other_403_is_plain_upstream_error() {
        assert_eq!(
            classify(403, "PERMISSION_DENIED"),
            UpstreamClassification::Upstream(403)
        );
    }

    #[test]
    fn classifies_capacity_exhausted() {
        assert_eq!(
            classify(503, "CAPACITY_EXHAUSTED"),
            UpstreamClassification::CapacityExhausted
        );
        assert_eq!(
            classify(503, "insufficient capacity"),
            UpstreamClassification::CapacityExhausted
        );
    }

    #[test]
    fn other_503_is_plain_upstream_error() {
        assert_eq!(
            classify(503, "internal error"),
            UpstreamClassification::Upstream(503)
        );
    }

    #[test]
    fn classifies_model_not_found_and_unauthenticated() {
        assert_eq!(classify(404, ""), UpstreamClassification::ModelNotFound);
        assert_eq!(classify(401, ""), UpstreamClassification::Unauthenticated);
    }

    #[test]
    fn rotate_reason_maps_permanent_and_transient_kinds() {
        assert_eq!(
            UpstreamClassification::RateLimited.rotate_reason(),
            Some(account_pool::RotateReason::RateLimited)
        );
        assert_eq!(
            UpstreamClassification::Unauthenticated.rotate_reason(),
            None
        );
    }
}
