//! Admin API for account and pool management
//!
//! Runs on a separate listener port (default 9090), never reachable through
//! the public ingress surfaces. Endpoints:
//!
//! - GET    /admin/accounts               — list accounts with pool + sync status
//! - POST   /admin/accounts/init-oauth    — start PKCE flow, return auth URL
//! - POST   /admin/accounts/complete-oauth — exchange code, store credential, add to pool
//! - DELETE /admin/accounts/{id}          — remove account from pool + stores
//! - GET    /admin/pool                   — pool status summary
//! - POST   /admin/pool/mode              — change scheduling mode at runtime
//! - GET    /admin/model-mappings         — list model-mapping rules
//! - POST   /admin/model-mappings         — add a model-mapping rule

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use account_pool::{Pool, SchedulingMode};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use oauth_client::{Account, AccountStore, ClientKind, Credential, CredentialStore};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use translators::ModelMapping;

/// In-memory PKCE state for an in-progress OAuth flow.
///
/// Created by init-oauth and consumed by complete-oauth. Expires after
/// PKCE_EXPIRY_SECS to prevent stale verifiers from accumulating.
struct PkceState {
    verifier: String,
    client_kind: ClientKind,
    created_at: Instant,
}

/// Maximum age of a PKCE state entry before it expires.
const PKCE_EXPIRY_SECS: u64 = 600; // 10 minutes

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<Pool>,
    account_store: Arc<AccountStore>,
    http_client: reqwest::Client,
    pkce_states: Arc<Mutex<HashMap<String, PkceState>>>,
    model_mappings: Arc<Mutex<Vec<ModelMapping>>>,
}

impl AdminState {
    pub fn new(
        pool: Arc<Pool>,
        account_store: Arc<AccountStore>,
        http_client: reqwest::Client,
        model_mappings: Vec<ModelMapping>,
    ) -> Self {
        Self {
            pool,
            account_store,
            http_client,
            pkce_states: Arc::new(Mutex::new(HashMap::new())),
            model_mappings: Arc::new(Mutex::new(model_mappings)),
        }
    }
}

/// Build the admin axum router with all account/pool management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/accounts", get(list_accounts))
        .route("/admin/accounts/init-oauth", post(init_oauth))
        .route("/admin/accounts/complete-oauth", post(complete_oauth))
        .route("/admin/accounts/{id}", delete(delete_account))
        .route("/admin/pool", get(pool_status))
        .route("/admin/pool/mode", post(set_pool_mode))
        .route("/admin/model-mappings", get(list_model_mappings))
        .route("/admin/model-mappings", post(add_model_mapping))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/accounts — list all accounts merging pool runtime status with
/// the sync-derived fields (`status_reason`, `ineligible_tiers`). Never
/// exposes tokens.
async fn list_accounts(State(state): State<AdminState>) -> impl IntoResponse {
    let pool_statuses = state.pool.statuses().await;
    let pool_accounts: HashMap<String, serde_json::Value> = pool_statuses["accounts"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| {
            a.get("id")
                .and_then(|id| id.as_str())
                .map(|id| (id.to_string(), a.clone()))
        })
        .collect();

    let accounts: Vec<serde_json::Value> = state
        .account_store
        .all()
        .await
        .into_iter()
        .map(|account| {
            let pool_info = pool_accounts.get(&account.id).cloned();
            serde_json::json!({
                "id": account.id,
                "email": account.email,
                "status": account.status,
                "is_forbidden": account.is_forbidden,
                "tier": account.tier,
                "status_reason": account.status_reason,
                "status_details": account.status_details,
                "ineligible_tiers": account.ineligible_tiers,
                "pool": pool_info,
            })
        })
        .collect();

    json_response(StatusCode::OK, serde_json::json!({ "accounts": accounts }))
}

#[derive(Deserialize)]
struct InitOAuthRequest {
    #[serde(default)]
    client_kind: Option<ClientKind>,
}

/// POST /admin/accounts/init-oauth — generate PKCE pair and return authorization URL.
async fn init_oauth(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<InitOAuthRequest>,
) -> impl IntoResponse {
    let client_kind = body.client_kind.unwrap_or(ClientKind::Native);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let account_id = format!("account-{timestamp}");

    let verifier = oauth_client::generate_verifier();
    let challenge = oauth_client::compute_challenge(&verifier);
    let authorization_url = oauth_client::build_authorization_url(&account_id, &challenge);

    let pkce_state = PkceState {
        verifier,
        client_kind,
        created_at: Instant::now(),
    };

    let mut states = state.pkce_states.lock().await;
    states.retain(|_, s| s.created_at.elapsed().as_secs() < PKCE_EXPIRY_SECS);
    states.insert(account_id.clone(), pkce_state);

    info!(account_id, %client_kind, "PKCE flow initiated");

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "authorization_url": authorization_url,
            "account_id": account_id,
            "client_kind": client_kind,
            "instructions": "Open the URL in a browser, authorize, then paste the code to complete-oauth"
        }),
    )
}

#[derive(Deserialize)]
struct CompleteOAuthRequest {
    account_id: String,
    code: String,
}

/// POST /admin/accounts/complete-oauth — exchange authorization code for tokens.
async fn complete_oauth(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<CompleteOAuthRequest>,
) -> impl IntoResponse {
    let pkce_state = {
        let mut states = state.pkce_states.lock().await;
        states.remove(&body.account_id)
    };

    let pkce_state = match pkce_state {
        Some(s) => s,
        None => {
            return json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "no pending OAuth flow for this account_id (expired or not initiated)"
                }),
            );
        }
    };

    if pkce_state.created_at.elapsed() > Duration::from_secs(PKCE_EXPIRY_SECS) {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "PKCE state expired (>10 minutes), please re-initiate with init-oauth"
            }),
        );
    }

    // The authorization code may carry a '#state' suffix from the redirect.
    let authorization_code = body.code.split('#').next().unwrap_or(&body.code);

    let token_response = match oauth_client::exchange_code(
        &state.http_client,
        authorization_code,
        &pkce_state.verifier,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(account_id = body.account_id, error = %e, "token exchange failed");
            return json_response(
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": format!("token exchange failed: {e}") }),
            );
        }
    };

    let now_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let expires_at = now_millis + token_response.expires_in * 1000;

    let Some(refresh_token) = token_response.refresh_token else {
        return json_response(
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": "token endpoint did not return a refresh token" }),
        );
    };

    let credential = Credential::new(
        body.account_id.clone(),
        pkce_state.client_kind,
        token_response.access_token,
        refresh_token,
        expires_at,
    );

    let credential_store: &Arc<CredentialStore> = state.pool.credential_store();
    if let Err(e) = credential_store
        .add(body.account_id.clone(), credential)
        .await
    {
        warn!(account_id = body.account_id, error = %e, "failed to store credential");
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": format!("failed to store credential: {e}") }),
        );
    }

    if let Err(e) = state
        .account_store
        .upsert(Account::new(body.account_id.clone(), None))
        .await
    {
        warn!(account_id = body.account_id, error = %e, "failed to store account record");
    }

    state.pool.add_account(body.account_id.clone()).await;

    info!(
        account_id = body.account_id,
        "OAuth flow completed, account added to pool"
    );

    json_response(
        StatusCode::OK,
        serde_json::json!({ "account_id": body.account_id, "status": "added" }),
    )
}

/// DELETE /admin/accounts/{id} — remove account from pool and both stores.
async fn delete_account(State(state): State<AdminState>, Path(id): Path<String>) -> impl IntoResponse {
    state.pool.remove_account(&id).await;

    let credential_store: &Arc<CredentialStore> = state.pool.credential_store();
    if let Err(e) = credential_store.remove(&id).await {
        warn!(account_id = id, error = %e, "credential removal failed");
    }
    if let Err(e) = state.account_store.remove(&id).await {
        warn!(account_id = id, error = %e, "account record removal failed");
    }

    info!(account_id = id, "account removed");

    json_response(
        StatusCode::OK,
        serde_json::json!({ "account_id": id, "status": "removed" }),
    )
}

/// GET /admin/pool — pool status summary (same shape as health's pool object).
async fn pool_status(State(state): State<AdminState>) -> impl IntoResponse {
    let statuses = state.pool.statuses().await;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        statuses.to_string(),
    )
}

#[derive(Deserialize)]
struct SetModeRequest {
    mode: SchedulingMode,
}

/// POST /admin/pool/mode — change the scheduling mode at runtime.
async fn set_pool_mode(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<SetModeRequest>,
) -> impl IntoResponse {
    state.pool.set_mode(body.mode).await;
    json_response(StatusCode::OK, serde_json::json!({ "mode": body.mode }))
}

/// GET /admin/model-mappings — list the configured model-mapping rules.
async fn list_model_mappings(State(state): State<AdminState>) -> impl IntoResponse {
    let mappings = state.model_mappings.lock().await;
    json_response(StatusCode::OK, serde_json::json!({ "mappings": &*mappings }))
}

/// POST /admin/model-mappings — add a model-mapping rule.
async fn add_model_mapping(
    State(state): State<AdminState>,
    axum::Json(mapping): axum::Json<ModelMapping>,
) -> impl IntoResponse {
    let mut mappings = state.model_mappings.lock().await;
    mappings.push(mapping);
    info!(count = mappings.len(), "model mapping added");
    json_response(StatusCode::CREATED, serde_json::json!({ "count": mappings.len() }))
}
