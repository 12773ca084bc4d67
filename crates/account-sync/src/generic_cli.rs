//! GENERIC_CLI account sync
//!
//! Mirrors the onboarding sequence a code-assist CLI performs on first use:
//! `loadCodeAssist` to discover the account's current tier and any existing
//! project, `onboardUser` to provision one if missing (polled as a
//! long-running operation), then the quota snapshot that onboarding
//! response carries.

use std::time::Duration;

use oauth_client::{ClientKind, Credential, GENERIC_CLI_API_BASE};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const ONBOARD_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ONBOARD_POLL_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct GenericCliSyncResult {
    pub tier: Option<String>,
    pub ineligible_tiers: Vec<String>,
    pub project_id: Option<String>,
    pub quota_data: Option<Value>,
}

/// Run the GENERIC_CLI sync sequence for a single credential.
///
/// Returns `Err` only on transport/parse failure; a rejected onboarding tier
/// is reported back as `ineligible_tiers`, not an error, since the account
/// itself is still valid for tiers it is eligible for.
pub async fn sync_account(
    client: &reqwest::Client,
    credential: &Credential,
) -> Result<GenericCliSyncResult> {
    debug_assert_eq!(credential.client_kind, ClientKind::GenericCli);
    let access_token = credential
        .access_token
        .as_deref()
        .ok_or_else(|| Error::MissingAccessToken(credential.account_id.clone()))?;

    let load_response = client
        .post(format!("{GENERIC_CLI_API_BASE}:loadCodeAssist"))
        .bearer_auth(access_token)
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;

    let current_tier = load_response
        .get("currentTier")
        .and_then(|t| t.get("id"))
        .and_then(Value::as_str)
        .map(String::from);

    let ineligible_tiers = load_response
        .get("allowedTiers")
        .and_then(Value::as_array)
        .map(|tiers| {
            tiers
                .iter()
                .filter(|t| t.get("isDefault").and_then(Value::as_bool) != Some(true))
                .filter_map(|t| t.get("id").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let mut project_id = load_response
        .get("cloudaicompanionProject")
        .and_then(Value::as_str)
        .map(String::from);

    let mut quota_data = load_response.get("quota").cloned();

    if project_id.is_none() {
        if let Some(tier) = &current_tier {
            let onboarded = onboard(client, access_token, tier).await?;
            project_id = onboarded.project_id;
            if onboarded.quota_data.is_some() {
                quota_data = onboarded.quota_data;
            }
        } else {
            warn!(
                account_id = %credential.account_id,
                "loadCodeAssist returned no current tier; skipping onboarding"
            );
        }
    }

    Ok(GenericCliSyncResult {
        tier: current_tier,
        ineligible_tiers,
        project_id,
        quota_data,
    })
}

struct OnboardResult {
    project_id: Option<String>,
    quota_data: Option<Value>,
}

async fn onboard(client: &reqwest::Client, access_token: &str, tier_id: &str) -> Result<OnboardResult> {
    let operation = client
        .post(format!("{GENERIC_CLI_API_BASE}:onboardUser"))
        .bearer_auth(access_token)
        .json(&serde_json::json!({"tierId": tier_id}))
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;

    let operation_name = operation
        .get("name")
        .and_then(Value::as_str)
        .map(String::from);

    let Some(operation_name) = operation_name else {
        return Ok(extract_onboard_result(&operation));
    };

    if operation.get("done").and_then(Value::as_bool) == Some(true) {
        return Ok(extract_onboard_result(&operation));
    }

    let deadline = tokio::time::Instant::now() + ONBOARD_POLL_DEADLINE;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::OnboardingTimedOut);
        }
        tokio::time::sleep(ONBOARD_POLL_INTERVAL).await;

        let status = client
            .get(format!("{GENERIC_CLI_API_BASE}/{operation_name}"))
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        if status.get("done").and_then(Value::as_bool) == Some(true) {
            return Ok(extract_onboard_result(&status));
        }
        debug!(operation_name, "onboarding operation still in progress");
    }
}

fn extract_onboard_result(operation: &Value) -> OnboardResult {
    let response = operation.get("response");
    OnboardResult {
        project_id: response
            .and_then(|r| r.get("cloudaicompanionProject"))
            .and_then(Value::as_str)
            .map(String::from),
        quota_data: response.and_then(|r| r.get("quota")).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_onboard_result_reads_nested_project() {
        let operation = serde_json::json!({
            "done": true,
            "response": {"cloudaicompanionProject": "proj-123", "quota": {"remainingFraction": 0.5}},
        });
        let result = extract_onboard_result(&operation);
        assert_eq!(result.project_id.as_deref(), Some("proj-123"));
        assert!(result.quota_data.is_some());
    }

    #[test]
    fn extract_onboard_result_handles_missing_response() {
        let operation = serde_json::json!({"done": true});
        let result = extract_onboard_result(&operation);
        assert!(result.project_id.is_none());
        assert!(result.quota_data.is_none());
    }
}
