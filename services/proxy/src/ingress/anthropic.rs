//! Anthropic-compatible `/v1/messages`

use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Body};
use futures_util::{Stream, StreamExt};
use translators::anthropic::{AnthropicStreamState, MessagesRequest, to_messages_response, to_upstream_request};
use translators::resolve_model;

use super::IngressState;
use crate::forwarder;
use crate::ingress::openai::{error_response, request_context};

pub async fn messages(
    State(state): State<IngressState>,
    headers: HeaderMap,
    Json(req): Json<MessagesRequest>,
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

    let id = format!("msg_{}", uuid::Uuid::new_v4());

    if stream {
        let byte_stream = upstream_response.bytes_stream();
        let sse = sse_to_message_events(byte_stream, id, requested_model);
        let mut response = Response::new(Body::from_stream(sse));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
        response
    } else {
        match upstream_response.json::<translators::UpstreamResponse>().await {
            Ok(parsed) => Json(to_messages_response(&parsed, &id, &requested_model)).into_response(),
            Err(e) => error_response(crate::error::Error::UpstreamError(e.to_string())),
        }
    }
}

/// Translate a Gemini-style SSE byte stream into the native Anthropic event
/// sequence, driving one `AnthropicStreamState` across every parsed chunk so
/// block indices stay consistent for the life of the response.
fn sse_to_message_events(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    id: String,
    requested_model: String,
) -> impl Stream<Item = Result<bytes::Bytes, std::io::Error>> + Send + 'static {
    let state = std::sync::Arc::new(tokio::sync::Mutex::new(AnthropicStreamState::new()));
    super::sse::lines(byte_stream).filter_map(move |line| {
        let state = state.clone();
        let id = id.clone();
        let requested_model = requested_model.clone();
        async move {
            if line == "[DONE]" {
                return None;
            }
            let parsed: translators::UpstreamResponse = serde_json::from_str(&line).ok()?;
            let mut guard = state.lock().await;
            let events = guard.push(&parsed, &id, &requested_model);
            drop(guard);
            let mut out = String::new();
            for (name, value) in events {
                out.push_str(&format!("event: {name}\ndata: {value}\n\n"));
            }
            if out.is_empty() {
                None
            } else {
                Some(Ok(bytes::Bytes::from(out)))
            }
        }
    })
}
