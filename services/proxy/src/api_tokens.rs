//! API token validation for the `/v1/*` ingress surfaces
//!
//! Tokens are loaded once from config at startup (persistent token
//! management is the external collaborator's job per the schema contract
//! in `api_tokens` — this process only validates against its configured
//! set). `Authorization: Bearer sk-…` and `x-api-key: sk-…` are both
//! accepted, matching the spec's external-interface table.

use std::collections::HashSet;

pub struct ApiTokenStore {
    tokens: HashSet<String>,
}

impl ApiTokenStore {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    pub fn is_valid(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// An empty configured set means auth is effectively disabled — used by
    /// local/dev configs that don't want to provision a token.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Extract the bearer/api-key credential from request headers, per §6.1:
/// `Authorization: Bearer sk-…` or `x-api-key: sk-…`.
pub fn extract_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = auth.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token);
            }
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn validates_known_token() {
        let store = ApiTokenStore::new(vec!["sk-test-1".into()]);
        assert!(store.is_valid("sk-test-1"));
        assert!(!store.is_valid("sk-unknown"));
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-abc".parse().unwrap());
        assert_eq!(extract_token(&headers), Some("sk-abc"));
    }

    #[test]
    fn extracts_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-xyz".parse().unwrap());
        assert_eq!(extract_token(&headers), Some("sk-xyz"));
    }

    #[test]
    fn prefers_bearer_over_api_key_when_both_present() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-bearer".parse().unwrap());
        headers.insert("x-api-key", "sk-apikey".parse().unwrap());
        assert_eq!(extract_token(&headers), Some("sk-bearer"));
    }

    #[test]
    fn returns_none_when_absent() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn empty_store_reports_empty() {
        let store = ApiTokenStore::new(vec![]);
        assert!(store.is_empty());
    }
}
