//! `Provider` trait adapter over the account pool
//!
//! The request path (`forwarder.rs`) does its own per-attempt account
//! selection and rotation because it needs the pool's richer,
//! multi-account `RotateReason` taxonomy and retry loop — the `Provider`
//! trait's single-identity `prepare_request`/`classify_error` shape doesn't
//! have room for that. What it's a good fit for is `/health`: the trait's
//! `ProviderHealth` shape is exactly what the pool's status snapshot already
//! looks like, so `PooledProvider` exists to feed that endpoint through the
//! same abstraction other providers would use.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use account_pool::Pool;
use provider::{ErrorClassification, Provider, ProviderHealth};

use crate::error::classify;

pub struct PooledProvider {
    pool: Arc<Pool>,
}

impl PooledProvider {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

impl Provider for PooledProvider {
    fn id(&self) -> &str {
        "pool"
    }

    fn needs_body(&self) -> bool {
        false
    }

    fn prepare_request<'a>(
        &'a self,
        _headers: &'a mut reqwest::header::HeaderMap,
        _body: &'a mut serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = provider::Result<Option<String>>> + Send + 'a>> {
        // Account selection and header injection happen per-attempt inside
        // the forwarder's retry loop, not here.
        Box::pin(async { Ok(None) })
    }

    fn classify_error(&self, status: u16, body: &str) -> ErrorClassification {
        match classify(status, body).rotate_reason() {
            Some(reason) if reason_is_quota(reason) => ErrorClassification::QuotaExceeded,
            Some(_) => ErrorClassification::Permanent,
            None => ErrorClassification::Transient,
        }
    }

    fn report_error(
        &self,
        account_id: &str,
        classification: ErrorClassification,
    ) -> Pin<Box<dyn Future<Output = provider::Result<()>> + Send + '_>> {
        let account_id = account_id.to_string();
        Box::pin(async move {
            let reason = match classification {
                ErrorClassification::QuotaExceeded => Some(account_pool::RotateReason::QuotaExhausted),
                ErrorClassification::Permanent => Some(account_pool::RotateReason::Unauthenticated),
                ErrorClassification::Transient => None,
            };
            if let Some(reason) = reason {
                self.pool.rotate(&account_id, reason).await;
            }
            Ok(())
        })
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = ProviderHealth> + Send + '_>> {
        Box::pin(async {
            let statuses = self.pool.statuses().await;
            let account_count = statuses["accounts"].as_array().map(|a| a.len()).unwrap_or(0);
            let status = if account_count == 0 { "degraded" } else { "healthy" };
            ProviderHealth {
                status: status.to_string(),
                pool: Some(statuses),
            }
        })
    }
}

fn reason_is_quota(reason: account_pool::RotateReason) -> bool {
    matches!(
        reason,
        account_pool::RotateReason::QuotaExhausted | account_pool::RotateReason::CapacityExhausted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth_client::CredentialStore;

    async fn empty_pool() -> Arc<Pool> {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path().join("credentials.json")).await.unwrap());
        Arc::new(Pool::new(
            vec![],
            std::time::Duration::from_secs(60),
            store,
            reqwest::Client::new(),
        ))
    }

    #[tokio::test]
    async fn health_reports_degraded_with_no_accounts() {
        let pool = empty_pool().await;
        let provider = PooledProvider::new(pool);
        let health = provider.health().await;
        assert_eq!(health.status, "degraded");
        assert!(health.pool.is_some());
    }

    #[tokio::test]
    async fn classify_error_maps_rate_limit_to_transient() {
        let pool = empty_pool().await;
        let provider = PooledProvider::new(pool);
        assert_eq!(provider.classify_error(429, ""), ErrorClassification::Transient);
        assert_eq!(
            provider.classify_error(403, "RESOURCE_EXHAUSTED"),
            ErrorClassification::QuotaExceeded
        );
        assert_eq!(provider.classify_error(401, ""), ErrorClassification::Permanent);
    }

    #[tokio::test]
    async fn id_and_needs_body() {
        let pool = empty_pool().await;
        let provider = PooledProvider::new(pool);
        assert_eq!(provider.id(), "pool");
        assert!(!provider.needs_body());
    }
}
