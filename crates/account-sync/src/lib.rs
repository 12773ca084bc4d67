//! Account sync
//!
//! Refreshes the operator-facing `Account` and the sync-derived fields on
//! `Credential` (tier, models, quota) by calling out to each account's
//! upstream surface. Runs on its own short-lived `reqwest::Client` — sync
//! calls are infrequent and shouldn't share connection-pool state with the
//! request-path forwarder.

pub mod aggregate;
pub mod error;
pub mod generic_cli;
pub mod native;

pub use error::{Error, Result};
pub use generic_cli::GenericCliSyncResult;
pub use native::NativeSyncResult;

use std::time::{SystemTime, UNIX_EPOCH};

use oauth_client::{Account, AccountStore, ClientKind, CredentialStore};
use tracing::{info, warn};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Build the dedicated client account-sync uses for its own outbound calls.
pub fn build_sync_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
}

/// Run one full sync pass over every stored credential: GENERIC_CLI
/// accounts first, then NATIVE, matching the fixed order sync was
/// originally specified to run in. Each account's failure is isolated —
/// one account's transport error doesn't stop the rest of the pass.
pub async fn run_sync_pass(
    credential_store: &CredentialStore,
    account_store: &AccountStore,
    http_client: &reqwest::Client,
) {
    for client_kind in [ClientKind::GenericCli, ClientKind::Native] {
        let credentials = credential_store.by_kind(client_kind).await;
        for credential in credentials {
            if credential.is_frozen() {
                continue;
            }
            sync_one(credential_store, account_store, http_client, &credential, client_kind).await;
        }
    }
}

async fn sync_one(
    credential_store: &CredentialStore,
    account_store: &AccountStore,
    http_client: &reqwest::Client,
    credential: &oauth_client::Credential,
    client_kind: ClientKind,
) {
    let account_id = credential.account_id.clone();
    let mut account = account_store
        .get(&account_id)
        .await
        .unwrap_or_else(|| Account::new(account_id.clone(), None));

    let sync_result = match client_kind {
        ClientKind::GenericCli => generic_cli::sync_account(http_client, credential)
            .await
            .map(SyncOutcome::GenericCli),
        ClientKind::Native => native::sync_account(http_client, credential)
            .await
            .map(SyncOutcome::Native),
    };

    match sync_result {
        Ok(SyncOutcome::GenericCli(result)) => {
            aggregate::apply_generic_cli(&mut account, &result);
            let _ = credential_store
                .apply_sync(
                    &account_id,
                    result.tier.clone(),
                    credential.models.clone(),
                    result.quota_data.clone(),
                    result.project_id.clone(),
                    now_millis(),
                )
                .await;
            info!(account_id, "generic_cli sync succeeded");
        }
        Ok(SyncOutcome::Native(result)) => {
            aggregate::apply_native(&mut account, &result);
            let _ = credential_store
                .apply_sync(
                    &account_id,
                    credential.tier.clone(),
                    result.models.clone(),
                    credential.quota_data.clone(),
                    None,
                    now_millis(),
                )
                .await;
            info!(account_id, "native sync succeeded");
        }
        Err(err) => {
            warn!(account_id, %err, "account sync failed");
            aggregate::apply_failure(&mut account, err.to_string());
        }
    }

    let _ = account_store.upsert(account).await;
}

enum SyncOutcome {
    GenericCli(GenericCliSyncResult),
    Native(NativeSyncResult),
}
