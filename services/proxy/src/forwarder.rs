//! Upstream forwarder
//!
//! Owns the retry-on-rotate loop shared by every ingress surface. A single
//! call drives `pool.current()` → build request → send → classify, rotating
//! away from a bad account and trying again until the retry budget
//! (`min(pool.size, 5)`) is spent. This function never reads the response
//! body on the success path, so a streaming caller never gets buffered by
//! accident — it adapts `.bytes_stream()` straight off the returned
//! `reqwest::Response`.

use account_pool::{Pool, SelectedAccount};
use oauth_client::{ClientKind, Credential};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::warn;
use translators::UpstreamRequest;

use crate::error::{Error, Result, UpstreamClassification, classify};
use crate::metrics;

/// Headers to strip before forwarding or relaying (hop-by-hop per RFC 7230
/// §6.1, plus the response-framing headers spec calls out explicitly since
/// we re-encode the body ourselves on the translated paths).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-encoding",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Strip hop-by-hop headers from an upstream response before relaying it.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let to_remove: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in to_remove {
        headers.remove(name);
    }
}

const NATIVE_USER_AGENT: &str = "native-ide/1.0.0 linux/x86_64";
const GENERIC_CLI_USER_AGENT: &str = "google-genai-cli/1.0.0";
const GOOG_API_CLIENT: &str = "gl-go/1.21.0 grpc-go/1.60.0";
const PROJECT_FALLBACK: &str = "default-project";

/// Build request headers per §6.2's client-kind-dependent header-style
/// table. GENERIC_CLI never carries `x-goog-api-client` /
/// `x-goog-request-params`; mixing styles provokes a 403 upstream, so the
/// split is mandatory here, not a style choice.
fn build_headers(client_kind: ClientKind, access_token: &str, project_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match HeaderValue::from_str(&format!("Bearer {access_token}")) {
        Ok(v) => {
            headers.insert(AUTHORIZATION, v);
        }
        Err(e) => warn!(error = %e, "access token produced an invalid header value"),
    }

    match client_kind {
        ClientKind::Native => {
            headers.insert(USER_AGENT, HeaderValue::from_static(NATIVE_USER_AGENT));
            headers.insert(
                HeaderName::from_static("x-goog-api-client"),
                HeaderValue::from_static(GOOG_API_CLIENT),
            );
            let project = project_id.unwrap_or(PROJECT_FALLBACK);
            if let Ok(v) = HeaderValue::from_str(&format!("project={project}")) {
                headers.insert(HeaderName::from_static("x-goog-request-params"), v);
            }
        }
        ClientKind::GenericCli => {
            headers.insert(USER_AGENT, HeaderValue::from_static(GENERIC_CLI_USER_AGENT));
        }
    }

    headers
}

#[derive(serde::Serialize)]
struct OutboundEnvelope<'a> {
    project: &'a str,
    #[serde(rename = "requestId")]
    request_id: String,
    model: &'a str,
    #[serde(rename = "userAgent")]
    user_agent: &'static str,
    #[serde(rename = "requestType")]
    request_type: &'static str,
    request: &'a UpstreamRequest,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared retry loop: selects an account, asks `build_request` to produce
/// the (url, JSON body) pair for that account's credential, sends it, and
/// classifies the result. `build_request` is re-invoked on every attempt so
/// each retry picks up the newly-selected account's token/project.
async fn retry_loop(
    pool: &Pool,
    http_client: &reqwest::Client,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
    mut build_request: impl FnMut(&Credential, &SelectedAccount) -> (String, Value),
) -> Result<reqwest::Response> {
    let pool_size = pool.account_ids().await.len();
    if pool_size == 0 {
        return Err(Error::NoAccounts);
    }
    let max_attempts = pool_size.min(5);

    let mut attempt = 0;
    while attempt < max_attempts {
        attempt += 1;

        let selected = match pool.current(client_ip, user_agent).await {
            Ok(s) => s,
            Err(account_pool::Error::PoolExhausted(msg)) => {
                warn!(msg, attempt, "pool exhausted mid-retry");
                return Err(Error::AllExhausted);
            }
            Err(e) => {
                warn!(error = %e, attempt, "account selection failed, retrying");
                continue;
            }
        };

        pool.wait_cooldown(&selected.id).await;

        let credential = match pool.credential_store().get(&selected.id).await {
            Some(c) => c,
            None => {
                warn!(account_id = selected.id, "credential vanished mid-request");
                continue;
            }
        };

        let (url, body) = build_request(&credential, &selected);
        let headers = build_headers(
            credential.client_kind,
            &selected.access_token,
            credential.project_id.as_deref(),
        );

        pool.mark_request(&selected.id).await;

        let response = http_client.post(&url).headers(headers).json(&body).send().await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(account_id = selected.id, error = %e, attempt, "transport error contacting upstream");
                continue;
            }
        };

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body_text = response.text().await.unwrap_or_default();
        let classification = classify(status, &body_text);
        warn!(
            account_id = selected.id,
            status,
            ?classification,
            attempt,
            "upstream returned an error, classifying"
        );

        match classification {
            UpstreamClassification::Unauthenticated => {
                pool.refresh().await;
            }
            UpstreamClassification::RateLimited
            | UpstreamClassification::QuotaExceeded
            | UpstreamClassification::CapacityExhausted
            | UpstreamClassification::ModelNotFound => {
                let reason = classification
                    .rotate_reason()
                    .expect("classified reason always has a rotate mapping outside Unauthenticated/Upstream");
                pool.rotate(&selected.id, reason).await;
                metrics::record_account_rotation(reason.label());
            }
            UpstreamClassification::Upstream(_) => {
                return Err(Error::UpstreamError(format!("upstream returned {status}: {body_text}")));
            }
        }
    }

    metrics::record_pool_exhausted();
    Err(Error::AllExhausted)
}

/// Forward a translated request (OpenAI or Anthropic origin) through the
/// retry loop, wrapping it in the upstream envelope on every attempt.
pub async fn forward(
    pool: &Pool,
    http_client: &reqwest::Client,
    upstream_request: &UpstreamRequest,
    model: &str,
    stream: bool,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<reqwest::Response> {
    let method = if stream { "streamGenerateContent" } else { "generateContent" };
    let query = if stream { "?alt=sse" } else { "" };

    retry_loop(pool, http_client, client_ip, user_agent, |credential, selected| {
        let url = format!("{}:{method}{query}", credential.client_kind.api_base());
        let envelope = OutboundEnvelope {
            project: credential.project_id.as_deref().unwrap_or(PROJECT_FALLBACK),
            request_id: translators::build_request_id(now_millis(), uuid::Uuid::new_v4()),
            model,
            user_agent: "native-ide",
            request_type: "agent",
            request: upstream_request,
        };
        let _ = &selected.access_token; // token goes into headers, not body
        (url, serde_json::to_value(envelope).unwrap_or(Value::Null))
    })
    .await
}

/// Forward an already-encoded body verbatim to an arbitrary upstream method
/// suffix (e.g. `:loadCodeAssist`), used by the native catch-all ingress
/// where the client already speaks the upstream protocol and no envelope
/// wrapping or translation applies.
pub async fn forward_raw(
    pool: &Pool,
    http_client: &reqwest::Client,
    method_suffix: &str,
    body: Value,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<reqwest::Response> {
    retry_loop(pool, http_client, client_ip, user_agent, |credential, _selected| {
        let url = format!("{}{method_suffix}", credential.client_kind.api_base());
        (url, body.clone())
    })
    .await
}
