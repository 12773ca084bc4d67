//! NATIVE account sync
//!
//! `fetchAvailableModels` is the only call this surface needs: it reports
//! which models the account can reach and, per model, how much of its quota
//! remains. An entry missing `remainingFraction` is treated as fully
//! exhausted (`0.0`) rather than skipped, so a stale or partial response
//! never looks more available than it is.

use oauth_client::{ClientKind, Credential, NATIVE_API_BASE};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct NativeSyncResult {
    pub models: Vec<String>,
    /// Lowest `remainingFraction` across all reported models, as a percent
    /// in `[0.0, 100.0]`. `None` if the response carried no models at all.
    pub quota_percent: Option<f64>,
}

pub async fn sync_account(
    client: &reqwest::Client,
    credential: &Credential,
) -> Result<NativeSyncResult> {
    debug_assert_eq!(credential.client_kind, ClientKind::Native);
    let access_token = credential
        .access_token
        .as_deref()
        .ok_or_else(|| Error::MissingAccessToken(credential.account_id.clone()))?;

    let response = client
        .get(format!("{NATIVE_API_BASE}/models"))
        .bearer_auth(access_token)
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;

    Ok(parse_models_response(&response))
}

fn parse_models_response(response: &Value) -> NativeSyncResult {
    let entries = response
        .get("models")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let models: Vec<String> = entries
        .iter()
        .filter_map(|m| m.get("name").and_then(Value::as_str))
        .map(String::from)
        .collect();

    let quota_percent = if entries.is_empty() {
        None
    } else {
        let lowest = entries
            .iter()
            .map(|m| m.get("remainingFraction").and_then(Value::as_f64).unwrap_or(0.0))
            .fold(f64::INFINITY, f64::min);
        Some(lowest * 100.0)
    };

    NativeSyncResult {
        models,
        quota_percent,
    }
}
