//! OpenAI-compatible `/v1/models` and `/v1/chat/completions`

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Body};
use futures_util::StreamExt;
use serde_json::{Value, json};
use translators::openai::{ChatCompletionRequest, to_chat_completion, to_chat_completion_chunk, to_upstream_request};
use translators::resolve_model;

use super::IngressState;
use crate::error::{ClientErrorBody, ClientErrorType};
use crate::forwarder::{self, strip_hop_by_hop_headers};

/// Canned model catalog; this proxy maps everything through
/// `model_mappings` rather than discovering a live model list upstream.
pub async fn list_models() -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [
            {"id": "gemini-2.0-flash", "object": "model", "owned_by": "upstream"},
            {"id": "gemini-2.5-pro", "object": "model", "owned_by": "upstream"},
        ],
    }))
}

pub(super) fn request_context(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    (client_ip, user_agent)
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub async fn chat_completions(
    State(state): State<IngressState>,
    headers: HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    let (client_ip, user_agent) = request_context(&headers);
    let requested_model = req.model.clone();
    let mapped_model = {
        let mappings = state.model_mappings.lock().await;
        resolve_model(&requested_model, &mappings).to_string()
    };

    let mut upstream_request = to_upstream_request(&req);
    upstream_request.model = mapped_model.clone();
    let stream = req.stream;

    let result = forwarder::forward(
        &state.pool,
        &state.http_client,
        &upstream_request,
        &mapped_model,
        stream,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await;

    let upstream_response = match result {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = now_unix();

    if stream {
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop_headers(&mut response_headers);
        let byte_stream = upstream_response.bytes_stream();
        let sse = sse_to_chat_chunks(byte_stream, id, created, requested_model);
        let mut response = Response::new(Body::from_stream(sse));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
        response
    } else {
        match upstream_response.json::<translators::UpstreamResponse>().await {
            Ok(parsed) => Json(to_chat_completion(&parsed, &id, created, &requested_model)).into_response(),
            Err(e) => error_response(crate::error::Error::UpstreamError(e.to_string())),
        }
    }
}

fn sse_to_chat_chunks(
    byte_stream: impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    id: String,
    created: u64,
    requested_model: String,
) -> impl futures_util::Stream<Item = Result<bytes::Bytes, std::io::Error>> + Send + 'static {
    translate_sse(byte_stream, move |parsed| {
        to_chat_completion_chunk(&parsed, &id, created, &requested_model)
    })
}

/// Parse a Gemini-style SSE byte stream (`data: {...}\n\n` frames) into
/// translated JSON event frames, terminated with the OpenAI `[DONE]` marker.
fn translate_sse(
    byte_stream: impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    translate: impl Fn(translators::UpstreamResponse) -> Value + Send + 'static,
) -> impl futures_util::Stream<Item = Result<bytes::Bytes, std::io::Error>> + Send + 'static {
    super::sse::lines(byte_stream).filter_map(move |line| {
        let translate = &translate;
        async move {
            if line == "[DONE]" {
                return Some(Ok(bytes::Bytes::from_static(b"data: [DONE]\n\n")));
            }
            let parsed: translators::UpstreamResponse = serde_json::from_str(&line).ok()?;
            let value = translate(parsed);
            Some(Ok(bytes::Bytes::from(format!("data: {value}\n\n"))))
        }
    })
}

pub(super) fn error_response(err: crate::error::Error) -> Response {
    use crate::error::Error;
    let (status, kind) = match &err {
        Error::NoAccounts | Error::AllExhausted => (StatusCode::SERVICE_UNAVAILABLE, ClientErrorType::RateLimitError),
        Error::UpstreamError(_) => (StatusCode::BAD_GATEWAY, ClientErrorType::UpstreamError),
        Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, ClientErrorType::InvalidRequestError),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, ClientErrorType::ServerError),
    };
    let body = ClientErrorBody::new(kind, err.to_string());
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&body).unwrap_or_default(),
    )
        .into_response()
}
