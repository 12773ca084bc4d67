//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (initial OAuth flow completion)
//! 2. Token refresh (proactive and request-time refresh)
//!
//! Both operations POST to `TOKEN_ENDPOINT` with different grant types.
//! The token endpoint is shared across client kinds — only the downstream
//! API base differs once a credential is in hand.

use serde::{Deserialize, Serialize};

use crate::constants::{CLIENT_ID, CLIENT_SECRET, REDIRECT_URI, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// converts this to an absolute unix millisecond timestamp when storing
/// the credential. `refresh_token` is only present on the initial exchange;
/// refresh responses reuse the existing refresh token unless the endpoint
/// rotates it, so callers must fall back to the prior value when absent.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    pub scope: Option<String>,
}

/// Exchange an authorization code for tokens (initial OAuth flow).
///
/// This is the second step of the PKCE flow: the user has authorized
/// in their browser, and we received the authorization code. We send
/// the code along with the PKCE verifier to prove we initiated the flow.
pub async fn exchange_code(
    client: &reqwest::Client,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("redirect_uri", REDIRECT_URI),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Refresh an access token using a refresh token.
///
/// Called proactively by the background refresh task (before expiration)
/// and reactively at request time (when token is about to expire). A
/// `400`/`401`/`403` with `invalid_grant` or `unauthorized_client` in the
/// body means the refresh token is revoked or invalid; the caller must
/// freeze the credential rather than retry.
pub async fn refresh_token(client: &reqwest::Client, refresh: &str) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if is_permanent_grant_rejection(status.as_u16(), &body) {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Whether a token-endpoint failure means the grant itself is dead
/// (`invalid_grant` / `unauthorized_client`) rather than a transient failure
/// worth retrying on the next refresh cycle.
fn is_permanent_grant_rejection(status: u16, body: &str) -> bool {
    if !matches!(status, 400 | 401 | 403) {
        return false;
    }
    body.contains("invalid_grant") || body.contains("unauthorized_client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_deserializes() {
        let json =
            r#"{"access_token":"at_abc","refresh_token":"rt_def","expires_in":3600,"scope":"s"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.refresh_token.as_deref(), Some("rt_def"));
        assert_eq!(token.expires_in, 3600);
    }

    #[test]
    fn token_response_without_refresh_token_deserializes() {
        let json = r#"{"access_token":"at_abc","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn permanent_grant_rejection_detects_invalid_grant() {
        assert!(is_permanent_grant_rejection(
            400,
            r#"{"error":"invalid_grant"}"#
        ));
        assert!(is_permanent_grant_rejection(
            401,
            r#"{"error":"unauthorized_client"}"#
        ));
        assert!(!is_permanent_grant_rejection(
            500,
            r#"{"error":"server_error"}"#
        ));
        assert!(!is_permanent_grant_rejection(
            400,
            r#"{"error":"invalid_request"}"#
        ));
    }

    #[tokio::test]
    async fn exchange_code_rejects_invalid_code() {
        let client = reqwest::Client::new();
        let result = exchange_code(&client, "invalid-code", "invalid-verifier").await;
        assert!(result.is_err(), "invalid code must return error");
    }

    #[tokio::test]
    async fn refresh_token_rejects_invalid_token() {
        let client = reqwest::Client::new();
        let result = refresh_token(&client, "rt_invalid").await;
        assert!(result.is_err(), "invalid refresh token must return error");
    }
}
