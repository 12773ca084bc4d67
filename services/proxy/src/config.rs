//! Configuration types and loading

use account_pool::SchedulingMode;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use translators::ModelMapping;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub refresher: RefresherConfig,
    #[serde(default)]
    pub oauth: OauthConfig,
    #[serde(default)]
    pub model_mappings: Vec<ModelMapping>,
    #[serde(default)]
    pub api_tokens: Vec<String>,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// HTTP listener + upstream settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_admin_addr")]
    pub admin_listen_addr: SocketAddr,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub accounts_path: Option<PathBuf>,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

/// Account Pool settings (spec §4.1, §6.4 `pool_*` keys)
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub schedule_mode: SchedulingMode,
    /// `pool_cooldown`: minimum gap between requests to the same account,
    /// defaults to 0 (no throttle). Distinct from the fixed 60s window an
    /// account sits out after a 429, which isn't operator-configurable.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_true")]
    pub self_heal_on_exhaustion: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            schedule_mode: SchedulingMode::default(),
            cooldown_secs: default_cooldown(),
            self_heal_on_exhaustion: true,
        }
    }
}

/// Credential Refresher settings (spec §4.4, §6.4 `auto_refresh_*` keys)
#[derive(Debug, Deserialize)]
pub struct RefresherConfig {
    #[serde(default = "default_true")]
    pub auto_refresh_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_refresh_generic_cli_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_refresh_native_enabled: bool,
    #[serde(default = "default_refresh_interval_minutes")]
    pub auto_refresh_interval_minutes: u64,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            auto_refresh_enabled: true,
            auto_refresh_generic_cli_enabled: true,
            auto_refresh_native_enabled: true,
            auto_refresh_interval_minutes: default_refresh_interval_minutes(),
        }
    }
}

impl RefresherConfig {
    /// Clamp the configured interval to the documented minimum of 1 minute.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.auto_refresh_interval_minutes.max(1) * 60)
    }

    pub fn enabled_for(&self, kind: oauth_client::ClientKind) -> bool {
        match kind {
            oauth_client::ClientKind::GenericCli => self.auto_refresh_generic_cli_enabled,
            oauth_client::ClientKind::Native => self.auto_refresh_native_enabled,
        }
    }
}

/// OAuth endpoint overrides. Defaults to the constants baked into
/// `oauth-client`; present so an operator can point at a staging surface
/// without a rebuild.
#[derive(Debug, Deserialize, Default)]
pub struct OauthConfig {
    pub generic_cli_api_base: Option<String>,
    pub native_api_base: Option<String>,
}

/// Header to inject on the native passthrough path.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

fn default_admin_addr() -> SocketAddr {
    "127.0.0.1:9090".parse().expect("valid default admin addr")
}

fn default_upstream_timeout() -> u64 {
    180
}

fn default_cooldown() -> u64 {
    0
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval_minutes() -> u64 {
    15
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| common::Error::Config(format!("reading {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [proxy]
            listen_addr = "127.0.0.1:8080"
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.proxy.upstream_timeout_secs, 180);
        assert_eq!(config.pool.cooldown_secs, 0);
        assert!(config.refresher.auto_refresh_enabled);
        assert_eq!(config.refresher.interval(), Duration::from_secs(15 * 60));
        assert!(config.model_mappings.is_empty());
    }

    #[test]
    fn loads_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [proxy]
            listen_addr = "0.0.0.0:8080"
            admin_listen_addr = "127.0.0.1:9999"
            upstream_timeout_secs = 30

            [pool]
            schedule_mode = "performance"
            cooldown_secs = 30
            self_heal_on_exhaustion = false

            [refresher]
            auto_refresh_enabled = true
            auto_refresh_interval_minutes = 0

            [[model_mappings]]
            pattern = "gpt-4*"
            target = "upstream-pro"
            priority = 0
            created_at = 0

            api_tokens = ["sk-test-1"]
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.proxy.upstream_timeout_secs, 30);
        assert_eq!(config.pool.schedule_mode, SchedulingMode::Performance);
        assert!(!config.pool.self_heal_on_exhaustion);
        // interval is clamped to the documented minimum of 1 minute
        assert_eq!(config.refresher.interval(), Duration::from_secs(60));
        assert_eq!(config.model_mappings.len(), 1);
        assert_eq!(config.api_tokens, vec!["sk-test-1".to_string()]);
    }

    #[test]
    fn rejects_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path.toml"));
        assert!(result.is_err());
    }
}
