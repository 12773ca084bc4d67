//! Scheduling modes
//!
//! Three policies for mapping an inbound session to a pool account. The mode
//! is changeable at runtime via the admin API, hence `RwLock<SchedulingMode>`
//! in `Pool` rather than a constructor-only choice.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Stay on the session's bound account even while it is rate-limited;
    /// only switch when the account is fully exhausted. Favors cache-hit
    /// rate on the upstream's own prompt cache over raw availability.
    CacheFirst,
    /// Stay on the session's bound account, but switch immediately the
    /// moment it is rate-limited or exhausted ("hot switch"). Default.
    Balance,
    /// Ignore session affinity entirely; pick uniformly at random among
    /// eligible accounts on every request.
    Performance,
}

impl Default for SchedulingMode {
    fn default() -> Self {
        SchedulingMode::Balance
    }
}
