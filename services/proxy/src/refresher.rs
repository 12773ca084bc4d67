//! Credential Refresher background task
//!
//! A single long-lived task, independent of the request path. Every 60s
//! tick it refreshes any credential whose `last_sync_at` is older than the
//! configured interval (or has never synced), staggering successive
//! refreshes by 3s, then runs one account-sync pass if anything was
//! refreshed this tick. Gating on `last_sync_at` rather than the poll
//! cadence is what lets the scheduler wake frequently without
//! over-refreshing per the documented 60s-poll / interval-gated contract.

use std::sync::Arc;
use std::time::Duration;

use oauth_client::{ClientKind, Credential, CredentialStore};
use tracing::{info, warn};

use crate::config::RefresherConfig;
use crate::metrics;

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const REFRESH_STAGGER: Duration = Duration::from_secs(3);
const DISABLED_BACKOFF: Duration = Duration::from_secs(30);

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Run the refresher loop forever. Intended to be spawned as its own task
/// at startup; never returns under normal operation.
pub async fn run(
    config: RefresherConfig,
    credential_store: Arc<CredentialStore>,
    account_store: Arc<oauth_client::AccountStore>,
    oauth_http_client: reqwest::Client,
    sync_http_client: reqwest::Client,
) {
    loop {
        if !config.auto_refresh_enabled {
            tokio::time::sleep(DISABLED_BACKOFF).await;
            continue;
        }

        let interval_ms = config.interval().as_millis() as u64;
        let mut refreshed_any = false;

        for kind in [ClientKind::GenericCli, ClientKind::Native] {
            if !config.enabled_for(kind) {
                continue;
            }
            refreshed_any |= refresh_due_credentials(&credential_store, &oauth_http_client, kind, interval_ms).await;
        }

        if refreshed_any {
            account_sync::run_sync_pass(&credential_store, &account_store, &sync_http_client).await;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Refresh every non-frozen credential of `kind` whose `last_sync_at` is
/// older than `interval_ms` (or unset). Returns whether any credential was
/// actually refreshed, so the caller knows whether a sync pass is worth
/// running this tick.
async fn refresh_due_credentials(
    credential_store: &CredentialStore,
    http_client: &reqwest::Client,
    kind: ClientKind,
    interval_ms: u64,
) -> bool {
    let now = now_millis();
    let mut refreshed_any = false;

    for credential in credential_store.by_kind(kind).await {
        if credential.is_frozen() {
            continue;
        }
        let due = match credential.last_sync_at {
            Some(last) => now.saturating_sub(last) >= interval_ms,
            None => true,
        };
        if !due {
            continue;
        }
        if refresh_one(credential_store, http_client, &credential).await {
            refreshed_any = true;
        }
        tokio::time::sleep(REFRESH_STAGGER).await;
    }

    refreshed_any
}

async fn refresh_one(credential_store: &CredentialStore, http_client: &reqwest::Client, credential: &Credential) -> bool {
    let Some(refresh_token) = credential.refresh_token.as_deref() else {
        warn!(account_id = credential.account_id, "credential has no refresh token, skipping");
        return false;
    };

    match oauth_client::refresh_token(http_client, refresh_token).await {
        Ok(token) => {
            let expires_at = now_millis() + token.expires_in * 1000;
            let new_refresh = token.refresh_token.unwrap_or_else(|| refresh_token.to_string());
            let _ = credential_store
                .update_token(&credential.account_id, token.access_token, new_refresh, expires_at)
                .await;
            metrics::record_refresh(credential.client_kind.as_str(), "success");
            info!(account_id = credential.account_id, "refreshed credential");
            true
        }
        Err(e) if e.is_permanent_grant_failure() => {
            warn!(account_id = credential.account_id, error = %e, "refresh token rejected, freezing credential");
            let _ = credential_store.freeze(&credential.account_id).await;
            metrics::record_refresh(credential.client_kind.as_str(), "frozen");
            false
        }
        Err(e) => {
            warn!(account_id = credential.account_id, error = %e, "refresh attempt failed, will retry next cycle");
            metrics::record_refresh(credential.client_kind.as_str(), "error");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_credentials_means_nothing_to_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json")).await.unwrap();
        let refreshed = refresh_due_credentials(&store, &reqwest::Client::new(), ClientKind::Native, 900_000).await;
        assert!(!refreshed);
    }

    #[tokio::test]
    async fn frozen_credential_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json")).await.unwrap();
        let mut credential = Credential::new(
            "acct-1".into(),
            ClientKind::Native,
            "at".into(),
            "rt".into(),
            now_millis() + 3_600_000,
        );
        credential.freeze();
        store.add("acct-1".into(), credential).await.unwrap();

        let refreshed = refresh_due_credentials(&store, &reqwest::Client::new(), ClientKind::Native, 0).await;
        assert!(!refreshed);
    }
}
