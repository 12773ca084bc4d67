//! Aggregation rules for turning a raw sync result into the `Account`
//! record the admin API and pool surface to operators.

use oauth_client::Account;
use serde_json::Value;

use crate::generic_cli::GenericCliSyncResult;
use crate::native::NativeSyncResult;

/// Fold a GENERIC_CLI sync result onto an existing account record.
pub fn apply_generic_cli(account: &mut Account, result: &GenericCliSyncResult) {
    account.tier = result.tier.clone();
    account.ineligible_tiers = result.ineligible_tiers.clone();
    account.is_forbidden = false;
    account.status_reason = None;
    account.status_details = result.quota_data.clone();
}

/// Fold a NATIVE sync result onto an existing account record. Quota below
/// the forbidden floor marks the account forbidden with a status reason an
/// operator can act on without digging through logs.
pub fn apply_native(account: &mut Account, result: &NativeSyncResult) {
    const FORBIDDEN_QUOTA_FLOOR: f64 = 0.01;

    account.is_forbidden = matches!(result.quota_percent, Some(p) if p <= FORBIDDEN_QUOTA_FLOOR);
    account.status_reason = if account.is_forbidden {
        Some("quota exhausted on all reachable models".to_string())
    } else {
        None
    };
    account.status_details = Some(Value::from(result.quota_percent.unwrap_or(0.0)));
}

/// Record a transport/auth failure without discarding what the account
/// already knew about itself (tier, eligibility).
pub fn apply_failure(account: &mut Account, reason: impl Into<String>) {
    account.status_reason = Some(reason.into());
}
