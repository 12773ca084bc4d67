//! Client-facing ingress: OpenAI, Anthropic, and native passthrough surfaces
//!
//! All three routes share one `IngressState` (pool, http client, model
//! mappings) and sit behind the `auth::require_api_token` middleware layer;
//! the native catch-all is mounted separately by the caller since it speaks
//! for whatever path the upstream client already expects.

pub mod anthropic;
pub mod auth;
pub mod native;
pub mod openai;
mod sse;

use std::sync::Arc;

use account_pool::Pool;
use axum::Router;
use axum::routing::{get, post};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use translators::ModelMapping;

use crate::api_tokens::ApiTokenStore;

#[derive(Clone)]
pub struct IngressState {
    pub pool: Arc<Pool>,
    pub http_client: reqwest::Client,
    pub model_mappings: Arc<Mutex<Vec<ModelMapping>>>,
}

/// Build the router for the authenticated `/v1/*` client surfaces, plus the
/// unauthenticated native catch-all. The native passthrough carries its own
/// upstream bearer token per account so it isn't gated behind the proxy's
/// own API-token check; it's merged in after the auth layer applies.
pub fn build_ingress_router(state: IngressState, api_tokens: Arc<ApiTokenStore>) -> Router {
    let authenticated = Router::new()
        .route("/v1/models", get(openai::list_models))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/messages", post(anthropic::messages))
        .layer(axum::middleware::from_fn_with_state(
            api_tokens,
            auth::require_api_token,
        ));

    let native = Router::new().fallback(native::passthrough);

    authenticated
        .merge(native)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
