//! Account storage
//!
//! `Account` is the operator-facing record: what account-sync has learned
//! about an account's tier, eligibility, and standing, independent of the
//! raw OAuth token material in `CredentialStore`. Kept as a companion
//! atomic-write JSON file, same durability pattern as credentials.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: Option<String>,
    /// Operator-visible lifecycle status, e.g. "active" / "disabled".
    pub status: String,
    pub is_forbidden: bool,
    pub tier: Option<String>,
    pub status_reason: Option<String>,
    pub status_details: Option<serde_json::Value>,
    #[serde(default)]
    pub ineligible_tiers: Vec<String>,
}

impl Account {
    pub fn new(id: String, email: Option<String>) -> Self {
        Self {
            id,
            email,
            status: "active".into(),
            is_forbidden: false,
            tier: None,
            status_reason: None,
            status_details: None,
            ineligible_tiers: Vec::new(),
        }
    }
}

pub struct AccountStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Account>>,
}

impl AccountStore {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading account file: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing account file: {e}")))?
        } else {
            let store = HashMap::new();
            write_atomic(&path, &store).await?;
            store
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn get(&self, account_id: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state.get(account_id).cloned()
    }

    pub async fn all(&self) -> Vec<Account> {
        let state = self.state.lock().await;
        state.values().cloned().collect()
    }

    pub async fn upsert(&self, account: Account) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(account.id.clone(), account);
        write_atomic(&self.path, &state).await
    }

    pub async fn remove(&self, account_id: &str) -> Result<Option<Account>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(account_id);
        if removed.is_some() {
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    /// Apply the aggregation rules an account-sync pass produces: tier,
    /// ineligible tiers, forbidden flag, and status reason/details.
    pub async fn apply_sync(
        &self,
        account_id: &str,
        tier: Option<String>,
        ineligible_tiers: Vec<String>,
        is_forbidden: bool,
        status_reason: Option<String>,
        status_details: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = state
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id} not in account store")))?;
        account.tier = tier;
        account.ineligible_tiers = ineligible_tiers;
        account.is_forbidden = is_forbidden;
        account.status_reason = status_reason;
        account.status_details = status_details;
        debug!(account_id, "applied account-sync result");
        write_atomic(&self.path, &state).await
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }
}

async fn write_atomic(path: &Path, data: &HashMap<String, Account>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing accounts: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("account path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        let store = AccountStore::load(path.clone()).await.unwrap();
        store
            .upsert(Account::new("acct-1".into(), Some("a@example.com".into())))
            .await
            .unwrap();

        let store2 = AccountStore::load(path).await.unwrap();
        let account = store2.get("acct-1").await.unwrap();
        assert_eq!(account.email.as_deref(), Some("a@example.com"));
        assert_eq!(account.status, "active");
    }

    #[tokio::test]
    async fn apply_sync_updates_eligibility() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        let store = AccountStore::load(path).await.unwrap();
        store
            .upsert(Account::new("acct-1".into(), None))
            .await
            .unwrap();

        store
            .apply_sync(
                "acct-1",
                Some("standard-tier".into()),
                vec!["legacy-tier".into()],
                false,
                None,
                None,
            )
            .await
            .unwrap();

        let account = store.get("acct-1").await.unwrap();
        assert_eq!(account.tier.as_deref(), Some("standard-tier"));
        assert_eq!(account.ineligible_tiers, vec!["legacy-tier"]);
    }

    #[tokio::test]
    async fn apply_sync_nonexistent_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = AccountStore::load(path).await.unwrap();

        let result = store
            .apply_sync("missing", None, vec![], false, None, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = AccountStore::load(path).await.unwrap();

        store
            .upsert(Account::new("acct-1".into(), None))
            .await
            .unwrap();
        assert!(store.remove("acct-1").await.unwrap().is_some());
        assert!(store.remove("acct-1").await.unwrap().is_none());
    }
}
