//! Passthrough provider — wraps existing static header injection behavior.
//!
//! This provider preserves backward compatibility: existing `[[headers]]` config
//! continues to work identically. The proxy delegates to this provider when no
//! `[oauth]` section is present.

use crate::{ErrorClassification, Provider, ProviderHealth};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use tracing::warn;

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Static header injection provider — no token management, no body modification.
///
/// Replicates the original proxy behavior: inject configured headers, protect
/// the Authorization header from being overwritten.
pub struct PassthroughProvider {
    headers: Vec<HeaderInjection>,
}

impl PassthroughProvider {
    pub fn new(headers: Vec<HeaderInjection>) -> Self {
        Self { headers }
    }
}

impl Provider for PassthroughProvider {
    fn id(&self) -> &str {
        "passthrough"
    }

    fn needs_body(&self) -> bool {
        false
    }

    fn prepare_request<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
        _body: &'a mut serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = crate::Result<Option<String>>> + Send + 'a>> {
        for injection in &self.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == reqwest::header::AUTHORIZATION {
                warn!(header = %injection.name, "refusing to overwrite authorization header per spec");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }
        Box::pin(async { Ok(None) })
    }

    fn classify_error(&self, _status: u16, _body: &str) -> ErrorClassification {
        // Passthrough has no pool — all errors are transient from its perspective.
        // The forwarder's own retry logic handles timeouts.
        ErrorClassification::Transient
    }

    fn report_error(
        &self,
        _account_id: &str,
        _classification: ErrorClassification,
    ) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + '_>> {
        // No-op: passthrough has no account state to update.
        Box::pin(async { Ok(()) })
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = ProviderHealth> + Send + '_>> {
        Box::pin(async {
            ProviderHealth {
                status: "healthy".to_string(),
                pool: None,
            }
        })
    }
}
