//! Pool state and account selection
//!
//! The pool tracks which accounts are eligible, which are temporarily
//! rate-limited, and which are permanently exhausted, and binds sessions to
//! accounts according to the active `SchedulingMode`. All mutable pool state
//! lives behind a single `tokio::sync::Mutex<PoolState>`; the lock is always
//! released before any `.await` that can suspend (credential lookups, token
//! refresh, `cache_first`'s rate-limit wait), so a slow upstream call never
//! blocks an unrelated selection.
//!
//! The credential store is the single source of truth for token material;
//! the pool reads it at selection time and only falls back to an inline
//! refresh if the credential refresher hasn't gotten to an account in time.
//!
//! Two distinct cooldowns are tracked, and must not be conflated: the
//! rate-limit window (`rate_limited[id]`, fixed at 60s on every `429`,
//! independent of configuration) and the per-account request cadence
//! (`last_request_at[id]` + the configurable `request_cooldown`, default 0,
//! throttling how fast successive requests hit the same account).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use oauth_client::CredentialStore;
use rand::RngExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mode::SchedulingMode;
use crate::session::{SessionBindings, fingerprint};

/// Fixed rate-limit window applied on a `429` (spec §4.1: `rate_limited[id]
/// := now + 60s`). This is independent of the operator-configurable
/// `request_cooldown`, which throttles cadence, not rate-limit recovery.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Why an account is being rotated away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateReason {
    /// Transient 429 — temporary, clears after `cooldown_duration`.
    RateLimited,
    /// 403 RESOURCE_EXHAUSTED / quota language — permanent until an
    /// operator or account-sync clears it.
    QuotaExhausted,
    /// 401 — credential is bad; permanent until refreshed/replaced.
    Unauthenticated,
    /// 503 CAPACITY_EXHAUSTED — permanent, same treatment as quota exhaustion.
    CapacityExhausted,
    /// 404 for the requested model — permanent for this account.
    ModelNotFound,
}

impl RotateReason {
    fn is_permanent(self) -> bool {
        matches!(
            self,
            RotateReason::QuotaExhausted
                | RotateReason::Unauthenticated
                | RotateReason::CapacityExhausted
                | RotateReason::ModelNotFound
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            RotateReason::RateLimited => "rate_limited",
            RotateReason::QuotaExhausted => "quota_exhausted",
            RotateReason::Unauthenticated => "unauthenticated",
            RotateReason::CapacityExhausted => "capacity_exhausted",
            RotateReason::ModelNotFound => "model_not_found",
        }
    }
}

/// A selected account with its access token, ready for a request.
#[derive(Debug)]
pub struct SelectedAccount {
    pub id: String,
    pub access_token: String,
}

struct PoolState {
    account_ids: Vec<String>,
    exhausted: HashSet<String>,
    rate_limited: HashMap<String, Instant>,
    load_counts: HashMap<String, u64>,
    last_request_at: HashMap<String, Instant>,
    bindings: SessionBindings,
    mode: SchedulingMode,
}

impl PoolState {
    /// Accounts that are neither exhausted nor still within a rate-limit
    /// cooldown window, as of `now`.
    fn eligible(&self, now: Instant) -> Vec<String> {
        self.account_ids
            .iter()
            .filter(|id| !self.exhausted.contains(*id))
            .filter(|id| {
                self.rate_limited
                    .get(*id)
                    .is_none_or(|until| now >= *until)
            })
            .cloned()
            .collect()
    }

    fn least_loaded<'a>(&self, candidates: &'a [String]) -> &'a str {
        candidates
            .iter()
            .min_by_key(|id| self.load_counts.get(*id).copied().unwrap_or(0))
            .map(|s| s.as_str())
            .unwrap_or(candidates[0].as_str())
    }

    fn mark_request(&mut self, account_id: &str) {
        *self.load_counts.entry(account_id.to_string()).or_insert(0) += 1;
        self.last_request_at.insert(account_id.to_string(), Instant::now());
    }
}

pub struct Pool {
    state: Mutex<PoolState>,
    /// If true, a fully-exhausted pool clears all marks and retries
    /// selection once before surfacing `PoolExhausted` to the caller.
    self_heal_on_exhaustion: bool,
    /// Per-account request-cadence throttle (spec's `pool_cooldown`,
    /// default 0). Distinct from the fixed 60s rate-limit window applied on
    /// a `429`, which is `RATE_LIMIT_COOLDOWN` and not configurable.
    request_cooldown: Duration,
    credential_store: Arc<CredentialStore>,
    http_client: reqwest::Client,
}

impl Pool {
    pub fn new(
        account_ids: Vec<String>,
        request_cooldown: Duration,
        credential_store: Arc<CredentialStore>,
        http_client: reqwest::Client,
    ) -> Self {
        info!(accounts = account_ids.len(), "pool initialized");
        Self {
            state: Mutex::new(PoolState {
                account_ids,
                exhausted: HashSet::new(),
                rate_limited: HashMap::new(),
                load_counts: HashMap::new(),
                last_request_at: HashMap::new(),
                bindings: SessionBindings::new(),
                mode: SchedulingMode::default(),
            }),
            self_heal_on_exhaustion: true,
            request_cooldown,
            credential_store,
            http_client,
        }
    }

    pub fn with_self_heal(mut self, enabled: bool) -> Self {
        self.self_heal_on_exhaustion = enabled;
        self
    }

    /// Reconcile the account list against the credential store, dropping
    /// any account whose credential has been frozen (`invalid_grant`).
    /// Called by account-sync and the refresher after each pass.
    pub async fn refresh(&self) {
        let mut state = self.state.lock().await;
        let mut kept = Vec::with_capacity(state.account_ids.len());
        for id in state.account_ids.drain(..) {
            match self.credential_store.get(&id).await {
                Some(cred) if !cred.is_frozen() => kept.push(id),
                Some(_) => {
                    warn!(account_id = id, "credential frozen, removing from pool");
                    state.exhausted.remove(&id);
                    state.rate_limited.remove(&id);
                    state.bindings.evict_account(&id);
                }
                None => {
                    warn!(account_id = id, "account missing from credential store");
                }
            }
        }
        state.account_ids = kept;
    }

    pub async fn set_mode(&self, mode: SchedulingMode) {
        self.state.lock().await.mode = mode;
        info!(mode = ?mode, "pool scheduling mode changed");
    }

    pub async fn mode(&self) -> SchedulingMode {
        self.state.lock().await.mode
    }

    /// Select an account for the given session, refreshing its token inline
    /// if it is about to expire. `client_ip`/`user_agent` drive the session
    /// fingerprint used by `cache_first`/`balance` affinity; `performance`
    /// mode ignores them.
    pub async fn current(
        &self,
        client_ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SelectedAccount> {
        let chosen = self.pick(client_ip, user_agent).await?;
        self.resolve(chosen).await
    }

    /// Select an account id per the active scheduling mode. Under
    /// `cache_first`, if the session's bound account is only temporarily
    /// rate-limited (not permanently exhausted), this suspends until its
    /// cooldown clears and then reuses it, rather than hot-switching — the
    /// lock is released before the sleep so an unrelated selection never
    /// blocks on it.
    async fn pick(&self, client_ip: Option<&str>, user_agent: Option<&str>) -> Result<String> {
        loop {
            let now = Instant::now();
            let mut state = self.state.lock().await;

            let mut eligible = state.eligible(now);
            if eligible.is_empty() && self.self_heal_on_exhaustion && !state.account_ids.is_empty() {
                info!("pool fully exhausted, self-healing (clearing marks, retrying once)");
                state.exhausted.clear();
                state.rate_limited.clear();
                eligible = state.account_ids.clone();
            }

            if eligible.is_empty() {
                let total = state.account_ids.len();
                let exhausted = state.exhausted.len();
                let rate_limited = state.rate_limited.len();
                return Err(Error::PoolExhausted(
                    exhausted_message(total, exhausted, rate_limited).to_string(),
                ));
            }

            match state.mode {
                SchedulingMode::Performance => {
                    let idx = rand::rng().random_range(0..eligible.len());
                    return Ok(eligible.swap_remove(idx));
                }
                SchedulingMode::Balance => {
                    let session = fingerprint(client_ip, user_agent);
                    let chosen = match state.bindings.get(&session) {
                        Some(bound) if eligible.contains(&bound) => bound,
                        _ => {
                            let picked = state.least_loaded(&eligible).to_string();
                            state.bindings.bind(session, picked.clone());
                            picked
                        }
                    };
                    return Ok(chosen);
                }
                SchedulingMode::CacheFirst => {
                    let session = fingerprint(client_ip, user_agent);
                    match state.bindings.get(&session) {
                        Some(bound) if eligible.contains(&bound) => return Ok(bound),
                        Some(bound) if !state.exhausted.contains(&bound) => {
                            let until = state.rate_limited.get(&bound).copied();
                            drop(state);
                            if let Some(until) = until {
                                tokio::time::sleep_until(until).await;
                            }
                            continue;
                        }
                        _ => {
                            let picked = state.least_loaded(&eligible).to_string();
                            state.bindings.bind(session, picked.clone());
                            return Ok(picked);
                        }
                    }
                }
            }
        }
    }

    /// Suspend until `request_cooldown` has elapsed since this account's
    /// last marked request (spec's `pool_cooldown`). A no-op when the
    /// cooldown is zero or the account has no prior request recorded.
    pub async fn wait_cooldown(&self, account_id: &str) {
        if self.request_cooldown.is_zero() {
            return;
        }
        let until = {
            let state = self.state.lock().await;
            state
                .last_request_at
                .get(account_id)
                .map(|&last| last + self.request_cooldown)
        };
        if let Some(until) = until {
            tokio::time::sleep_until(until).await;
        }
    }

    /// Record that a request is about to be sent to `account_id`, for
    /// least-loaded tie-breaking and the next `wait_cooldown` call.
    pub async fn mark_request(&self, account_id: &str) {
        self.state.lock().await.mark_request(account_id);
    }

    async fn resolve(&self, account_id: String) -> Result<SelectedAccount> {
        let credential = match self.credential_store.get(&account_id).await {
            Some(c) => c,
            None => {
                warn!(
                    account_id,
                    "account in pool but not in credential store, disabling"
                );
                self.rotate(&account_id, RotateReason::Unauthenticated).await;
                return Err(Error::NotFound(account_id));
            }
        };

        let now_millis = now_millis();
        let refresh_threshold_millis = 60_000;

        if credential.expires_within(now_millis, refresh_threshold_millis) {
            let Some(refresh) = credential.refresh_token.clone() else {
                self.rotate(&account_id, RotateReason::Unauthenticated).await;
                return Err(Error::Credential(format!(
                    "{account_id} has no refresh token (frozen)"
                )));
            };
            debug!(account_id, "token expiring soon, attempting inline refresh");
            match oauth_client::refresh_token(&self.http_client, &refresh).await {
                Ok(token_response) => {
                    let new_expires = now_millis + token_response.expires_in * 1000;
                    let new_refresh = token_response.refresh_token.unwrap_or(refresh);
                    if let Err(e) = self
                        .credential_store
                        .update_token(
                            &account_id,
                            token_response.access_token.clone(),
                            new_refresh,
                            new_expires,
                        )
                        .await
                    {
                        warn!(account_id, error = %e, "failed to persist refreshed token");
                    }
                    info!(account_id, "inline token refresh succeeded");
                    Ok(SelectedAccount {
                        id: account_id,
                        access_token: token_response.access_token,
                    })
                }
                Err(e) if e.is_permanent_grant_failure() => {
                    warn!(account_id, error = %e, "refresh token rejected, disabling account");
                    let _ = self.credential_store.freeze(&account_id).await;
                    self.rotate(&account_id, RotateReason::Unauthenticated).await;
                    Err(Error::Credential(e.to_string()))
                }
                Err(e) => {
                    warn!(account_id, error = %e, "inline refresh failed transiently");
                    Err(Error::Credential(e.to_string()))
                }
            }
        } else {
            let Some(access_token) = credential.access_token else {
                self.rotate(&account_id, RotateReason::Unauthenticated).await;
                return Err(Error::Credential(format!("{account_id} has no access token")));
            };
            Ok(SelectedAccount {
                id: account_id,
                access_token,
            })
        }
    }

    /// Record a rotation: the forwarder calls this after classifying an
    /// upstream error against the account that produced it.
    pub async fn rotate(&self, account_id: &str, reason: RotateReason) {
        let mut state = self.state.lock().await;
        if reason.is_permanent() {
            state.exhausted.insert(account_id.to_string());
            state.bindings.evict_account(account_id);
            warn!(account_id, reason = reason.label(), "account exhausted");
        } else {
            let until = Instant::now() + RATE_LIMIT_COOLDOWN;
            state.rate_limited.insert(account_id.to_string(), until);
            if state.mode != SchedulingMode::CacheFirst {
                state.bindings.evict_account(account_id);
            }
            info!(account_id, reason = reason.label(), cooldown_secs = RATE_LIMIT_COOLDOWN.as_secs(), "account rate-limited");
        }
    }

    /// Clear rotation marks for an account (account-sync found it healthy
    /// again, or an operator manually re-enabled it).
    pub async fn clear_marks(&self, account_id: &str) {
        let mut state = self.state.lock().await;
        state.exhausted.remove(account_id);
        state.rate_limited.remove(account_id);
    }

    pub async fn add_account(&self, account_id: String) {
        let mut state = self.state.lock().await;
        if !state.account_ids.contains(&account_id) {
            state.account_ids.push(account_id.clone());
        }
        state.exhausted.remove(&account_id);
        state.rate_limited.remove(&account_id);
        info!(account_id, "account added to pool");
    }

    pub async fn remove_account(&self, account_id: &str) {
        let mut state = self.state.lock().await;
        state.account_ids.retain(|id| id != account_id);
        state.exhausted.remove(account_id);
        state.rate_limited.remove(account_id);
        state.load_counts.remove(account_id);
        state.bindings.evict_account(account_id);
        info!(account_id, "account removed from pool");
    }

    pub async fn account_ids(&self) -> Vec<String> {
        self.state.lock().await.account_ids.clone()
    }

    pub fn credential_store(&self) -> &Arc<CredentialStore> {
        &self.credential_store
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Per-account + aggregate status snapshot for `/health` and
    /// `/admin/pool`.
    pub async fn statuses(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        let now = Instant::now();

        let mut accounts = Vec::new();
        let mut available = 0usize;
        let mut rate_limited_count = 0usize;
        let mut exhausted_count = 0usize;

        for id in &state.account_ids {
            if state.exhausted.contains(id) {
                exhausted_count += 1;
                accounts.push(serde_json::json!({"id": id, "status": "exhausted"}));
            } else if let Some(until) = state.rate_limited.get(id) {
                if now >= *until {
                    available += 1;
                    accounts.push(serde_json::json!({"id": id, "status": "available"}));
                } else {
                    rate_limited_count += 1;
                    accounts.push(serde_json::json!({
                        "id": id,
                        "status": "rate_limited",
                        "cooldown_remaining_secs": (*until - now).as_secs(),
                    }));
                }
            } else {
                available += 1;
                accounts.push(serde_json::json!({
                    "id": id,
                    "status": "available",
                    "requests": state.load_counts.get(id).copied().unwrap_or(0),
                }));
            }
        }

        let total = state.account_ids.len();
        let pool_status = if total == 0 {
            "unhealthy"
        } else if available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "mode": state.mode,
            "accounts_total": total,
            "accounts_available": available,
            "accounts_rate_limited": rate_limited_count,
            "accounts_exhausted": exhausted_count,
            "session_bindings": state.bindings.len(),
            "accounts": accounts,
        })
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn exhausted_message(total: usize, exhausted: usize, rate_limited: usize) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "type": "pool_exhausted",
            "message": "All accounts exhausted",
            "pool": {
                "accounts_total": total,
                "accounts_exhausted": exhausted,
                "accounts_rate_limited": rate_limited,
            }
        }
    })
}
