pub mod error;
pub mod federation;

use std::path::PathBuf;
use std::time::Duration;

pub use error::{FederationError, Result};
pub use federation::types::{Network, Origin, Settings};

use federation::relay::{validate_relay_url, DEFAULT_RELAY_URL};

/// Address the local development coordinator and client are served from.
pub const LOCAL_DEV_HOST_URL: &str = "http://127.0.0.1:12596";

// ─────────────────────────────────────────────────────────
// Runtime configuration
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FederationConfig {
    /// Relay websocket URLs of the order subscription.
    pub relays: Vec<String>,
    pub network: Network,
    pub origin: Origin,
    /// URL the client itself is served from.
    pub host_url: String,
    /// Keep the development-only member in the registry.
    pub is_local_development: bool,
    /// Route every member through `host_url/<network>/<alias>`.
    pub self_hosted_client: bool,
    /// Value of the relay `#n` filter.
    pub network_tag: String,
    /// Periodic coordinator refresh; `None` disables it.
    pub refresh_interval: Option<Duration>,
    pub http_timeout: Duration,
    /// e.g. `socks5h://127.0.0.1:9050` to reach onion endpoints.
    pub socks_proxy: Option<String>,
    /// JSON file backing the endpoint store; in-memory when unset.
    pub store_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            relays: vec![DEFAULT_RELAY_URL.to_string()],
            network: Network::Mainnet,
            origin: Origin::Onion,
            host_url: LOCAL_DEV_HOST_URL.to_string(),
            is_local_development: false,
            self_hosted_client: false,
            network_tag: Network::Mainnet.to_string(),
            refresh_interval: Some(Duration::from_secs(60)),
            http_timeout: Duration::from_secs(15),
            socks_proxy: None,
            store_path: None,
            log_dir: None,
        }
    }
}

fn env_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl FederationConfig {
    /// Defaults overridden by `FED_*` environment variables. Malformed
    /// values are rejected rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("FED_RELAYS") {
            let relays = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(validate_relay_url)
                .collect::<Result<Vec<_>>>()?;
            if !relays.is_empty() {
                cfg.relays = relays;
            }
        }
        if let Ok(v) = std::env::var("FED_NETWORK") {
            cfg.network = v.parse()?;
        }
        if let Ok(v) = std::env::var("FED_ORIGIN") {
            cfg.origin = v.parse()?;
        }
        if let Ok(v) = std::env::var("FED_HOST_URL") {
            cfg.host_url = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("FED_LOCAL_DEV") {
            cfg.is_local_development = env_flag(&v);
        }
        if let Ok(v) = std::env::var("FED_SELFHOSTED") {
            cfg.self_hosted_client = env_flag(&v);
        }
        if let Ok(v) = std::env::var("FED_NETWORK_TAG") {
            cfg.network_tag = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("FED_REFRESH_SECS") {
            let secs = v
                .trim()
                .parse::<u64>()
                .map_err(|e| FederationError::Config(format!("FED_REFRESH_SECS: {e}")))?;
            cfg.refresh_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(v) = std::env::var("FED_HTTP_TIMEOUT_SECS") {
            let secs = v
                .trim()
                .parse::<u64>()
                .map_err(|e| FederationError::Config(format!("FED_HTTP_TIMEOUT_SECS: {e}")))?;
            cfg.http_timeout = Duration::from_secs(secs.max(1));
        }
        if let Ok(v) = std::env::var("FED_SOCKS_PROXY") {
            cfg.socks_proxy = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }
        if let Ok(v) = std::env::var("FED_STORE_PATH") {
            cfg.store_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("FED_LOG_DIR") {
            cfg.log_dir = Some(PathBuf::from(v));
        }
        Ok(cfg)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            network: self.network,
            self_hosted_client: self.self_hosted_client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = FederationConfig::default();
        assert_eq!(cfg.relays, vec![DEFAULT_RELAY_URL.to_string()]);
        assert_eq!(cfg.network_tag, "mainnet");
        assert_eq!(cfg.refresh_interval, Some(Duration::from_secs(60)));
        assert!(!cfg.is_local_development);
        assert_eq!(cfg.settings(), Settings::default());
    }

    #[test]
    fn test_env_flag() {
        assert!(env_flag("1"));
        assert!(env_flag(" TRUE "));
        assert!(!env_flag("0"));
        assert!(!env_flag(""));
    }
}
