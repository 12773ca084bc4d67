//! Account pool for multi-account code-assist upstream access
//!
//! Manages multiple OAuth accounts with session-affine scheduling, quota
//! detection, and cooldown tracking. The pool reads credentials from
//! `oauth_client::CredentialStore` (single source of truth) and maintains
//! its own rotation state (exhausted set, rate-limit cooldowns, session
//! bindings) independently.
//!
//! Account lifecycle:
//! 1. Admin adds account via admin API → credential stored, account eligible
//! 2. Pool selects an account per the active `SchedulingMode`, refreshing
//!    its token inline if it's about to expire
//! 3. Upstream returns a classified error → forwarder calls `rotate()`
//! 4. Rate-limit cooldowns expire automatically; quota/auth exhaustion is
//!    cleared by the next successful account-sync pass or an operator
//! 5. The credential refresher (in the proxy binary) refreshes tokens
//!    proactively ahead of expiry, independent of the request path

pub mod error;
pub mod mode;
pub mod pool;
pub mod session;

pub use error::{Error, Result};
pub use mode::SchedulingMode;
pub use pool::{Pool, RotateReason, SelectedAccount};
pub use session::fingerprint;
