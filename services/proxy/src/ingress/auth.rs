//! API token authentication middleware for `/v1/*` routes

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api_tokens::{ApiTokenStore, extract_token};
use crate::error::{ClientErrorBody, ClientErrorType};

pub async fn require_api_token(
    State(store): State<Arc<ApiTokenStore>>,
    request: Request,
    next: Next,
) -> Response {
    if store.is_empty() {
        return next.run(request).await;
    }

    let valid = extract_token(request.headers())
        .map(|t| store.is_valid(t))
        .unwrap_or(false);

    if !valid {
        let body = ClientErrorBody::new(
            ClientErrorType::AuthenticationError,
            "invalid or missing API token",
        );
        return (
            StatusCode::UNAUTHORIZED,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::to_string(&body).unwrap_or_default(),
        )
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    fn router(store: ApiTokenStore) -> Router {
        let store = Arc::new(store);
        Router::new()
            .route("/protected", get(ok_handler))
            .layer(axum::middleware::from_fn_with_state(store, require_api_token))
    }

    #[tokio::test]
    async fn rejects_missing_token_when_store_nonempty() {
        let app = router(ApiTokenStore::new(vec!["sk-1".into()]));
        let response = app
            .oneshot(HttpRequest::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_valid_bearer_token() {
        let app = router(ApiTokenStore::new(vec!["sk-1".into()]));
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/protected")
                    .header("authorization", "Bearer sk-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_store_allows_all_requests() {
        let app = router(ApiTokenStore::new(vec![]));
        let response = app
            .oneshot(HttpRequest::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
