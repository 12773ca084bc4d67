//! Session affinity
//!
//! Requests are bound to an account by a fingerprint of `client_ip | user_agent`
//! so that `cache_first`/`balance` modes keep hitting the same upstream account
//! (and therefore its prompt cache) across a conversation. Bindings are an
//! LRU of at most `MAX_BINDINGS` entries, each expiring after `BINDING_TTL` of
//! inactivity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

pub const MAX_BINDINGS: usize = 1000;
pub const BINDING_TTL: Duration = Duration::from_secs(30 * 60);

/// Digest `client_ip | user_agent` into a 16-character hex fingerprint.
/// Falls back to `"unknown"` for either half that isn't available so that
/// at least same-IP-unknown-UA callers still share a binding.
pub fn fingerprint(client_ip: Option<&str>, user_agent: Option<&str>) -> String {
    let ip = client_ip.unwrap_or("unknown");
    let ua = user_agent.unwrap_or("unknown");
    let hash = Sha256::digest(format!("{ip}|{ua}").as_bytes());
    hash.iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

struct Binding {
    account_id: String,
    last_access: Instant,
}

/// Bounded, TTL'd map from session fingerprint to the account it is pinned
/// to. Eviction on overflow removes the least-recently-accessed entry.
#[derive(Default)]
pub struct SessionBindings {
    bindings: HashMap<String, Binding>,
}

impl SessionBindings {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Look up the account bound to `session`, if the binding exists and
    /// hasn't expired. Touches `last_access` on hit.
    pub fn get(&mut self, session: &str) -> Option<String> {
        let now = Instant::now();
        let expired = self
            .bindings
            .get(session)
            .is_some_and(|b| now.duration_since(b.last_access) > BINDING_TTL);
        if expired {
            self.bindings.remove(session);
            return None;
        }
        if let Some(binding) = self.bindings.get_mut(session) {
            binding.last_access = now;
            Some(binding.account_id.clone())
        } else {
            None
        }
    }

    /// Bind `session` to `account_id`, evicting the oldest entry first if
    /// the map is already at capacity.
    pub fn bind(&mut self, session: String, account_id: String) {
        if self.bindings.len() >= MAX_BINDINGS && !self.bindings.contains_key(&session) {
            if let Some(oldest) = self
                .bindings
                .iter()
                .min_by_key(|(_, b)| b.last_access)
                .map(|(k, _)| k.clone())
            {
                self.bindings.remove(&oldest);
            }
        }
        self.bindings.insert(
            session,
            Binding {
                account_id,
                last_access: Instant::now(),
            },
        );
    }

    /// Drop any binding pointing at `account_id` (used when an account is
    /// rotated away from in `balance` mode, forcing affected sessions onto
    /// a fresh account next time).
    pub fn evict_account(&mut self, account_id: &str) {
        self.bindings.retain(|_, b| b.account_id != account_id);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_16_chars() {
        let a = fingerprint(Some("1.2.3.4"), Some("curl/8"));
        let b = fingerprint(Some("1.2.3.4"), Some("curl/8"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fingerprint_differs_by_input() {
        let a = fingerprint(Some("1.2.3.4"), Some("curl/8"));
        let b = fingerprint(Some("1.2.3.5"), Some("curl/8"));
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_falls_back_to_unknown() {
        let a = fingerprint(None, None);
        let b = fingerprint(Some("unknown"), Some("unknown"));
        assert_eq!(a, b);
    }

    #[test]
    fn bind_then_get_returns_account() {
        let mut bindings = SessionBindings::new();
        bindings.bind("sess-1".into(), "acct-a".into());
        assert_eq!(bindings.get("sess-1"), Some("acct-a".into()));
    }

    #[test]
    fn get_on_unknown_session_is_none() {
        let mut bindings = SessionBindings::new();
        assert_eq!(bindings.get("nope"), None);
    }

    #[test]
    fn evict_account_removes_matching_bindings() {
        let mut bindings = SessionBindings::new();
        bindings.bind("sess-1".into(), "acct-a".into());
        bindings.bind("sess-2".into(), "acct-b".into());
        bindings.evict_account("acct-a");
        assert_eq!(bindings.get("sess-1"), None);
        assert_eq!(bindings.get("sess-2"), Some("acct-b".into()));
    }

    #[test]
    fn overflow_evicts_oldest_binding() {
        let mut bindings = SessionBindings::new();
        for i in 0..MAX_BINDINGS {
            bindings.bind(format!("sess-{i}"), format!("acct-{i}"));
        }
        assert_eq!(bindings.len(), MAX_BINDINGS);
        bindings.bind("sess-new".into(), "acct-new".into());
        assert_eq!(bindings.len(), MAX_BINDINGS);
        assert_eq!(bindings.get("sess-0"), None);
        assert_eq!(bindings.get("sess-new"), Some("acct-new".into()));
    }
}
