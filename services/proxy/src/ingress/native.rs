//! Native passthrough catch-all
//!
//! Clients that already speak the upstream protocol directly (no OpenAI/
//! Anthropic translation) post arbitrary JSON to an arbitrary method
//! suffix; this relays it verbatim through the retry loop and streams the
//! upstream response back byte-for-byte.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use super::IngressState;
use super::openai::{error_response, request_context};
use crate::forwarder::{self, strip_hop_by_hop_headers};

fn method_suffix(uri: &Uri) -> String {
    uri.path().trim_start_matches("/v1/native").to_string()
}

pub async fn passthrough(State(state): State<IngressState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let (client_ip, user_agent) = request_context(&parts.headers);
    let suffix = method_suffix(&parts.uri);

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {e}"),
            )
                .into_response();
        }
    };
    let body: Value = if bytes.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")).into_response();
            }
        }
    };

    let result = forwarder::forward_raw(
        &state.pool,
        &state.http_client,
        &suffix,
        body,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await;

    match result {
        Ok(upstream_response) => {
            let status = upstream_response.status();
            let mut headers = upstream_response.headers().clone();
            strip_hop_by_hop_headers(&mut headers);
            let byte_stream = upstream_response.bytes_stream();
            let mut response = Response::new(Body::from_stream(byte_stream));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
                .headers_mut()
                .entry(header::CONTENT_TYPE)
                .or_insert_with(|| "application/json".parse().unwrap());
            response
        }
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_suffix_strips_native_prefix() {
        let uri: Uri = "/v1/native/v1internal:loadCodeAssist".parse().unwrap();
        assert_eq!(method_suffix(&uri), "/v1internal:loadCodeAssist");
    }
}
