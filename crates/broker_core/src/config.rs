use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Top-level configuration for the stream broker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub upstream: UpstreamConfig,
    pub rate_limit: RateLimitConfig,
    pub stream_server: StreamServerConfig,
    pub policy: PolicyConfig,
    pub rpc_retry: RpcRetryConfig,
    pub log: LogConfig,
}

impl BrokerConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: BrokerConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BROKER_UPSTREAM_URL") {
            self.upstream.ws_url = v;
        }
        if let Ok(v) = std::env::var("BROKER_ACCESS_TOKEN") {
            self.upstream.access_token = Some(v);
        }
        if let Ok(v) = std::env::var("BROKER_PORT") {
            if let Ok(n) = v.parse() {
                self.stream_server.port = n;
            }
        }
        if let Ok(v) = std::env::var("BROKER_HOST") {
            self.stream_server.host = v;
        }
        if let Ok(v) = std::env::var("BROKER_WHITELIST_GROUPS") {
            self.policy.whitelist_groups = parse_id_set(&v);
        }
        if let Ok(v) = std::env::var("BROKER_WHITELIST_USERS") {
            self.policy.whitelist_users = parse_id_set(&v);
        }
        if let Ok(v) = std::env::var("BROKER_LOG_LEVEL") {
            self.log.level = v;
        }
    }
}

fn parse_id_set(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<i64>().ok())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub ws_url: String,
    pub access_token: Option<String>,
    pub reconnect: bool,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub request_timeout_ms: u64,
    pub auto_wait_open: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:6700".to_string(),
            access_token: None,
            reconnect: true,
            reconnect_min_ms: 1000,
            reconnect_max_ms: 15000,
            request_timeout_ms: 15000,
            auto_wait_open: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_concurrency: usize,
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            min_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for StreamServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub include_raw: bool,
    pub skip_animated_emoji: bool,
    pub skip_voice: bool,
    pub log_filtered: bool,
    pub whitelist_groups: HashSet<i64>,
    pub whitelist_users: HashSet<i64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            include_raw: false,
            skip_animated_emoji: false,
            skip_voice: true,
            log_filtered: false,
            whitelist_groups: HashSet::new(),
            whitelist_users: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcRetryConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for RpcRetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.stream_server.port, 8082);
        assert_eq!(cfg.rate_limit.max_concurrency, 5);
        assert!(cfg.policy.skip_voice);
        assert!(cfg.policy.whitelist_groups.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[upstream]
ws_url = "ws://example.com:6700"
"#;
        let cfg: BrokerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.upstream.ws_url, "ws://example.com:6700");
        // Defaults for unspecified fields
        assert_eq!(cfg.upstream.request_timeout_ms, 15000);
        assert!(cfg.upstream.reconnect);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[upstream]
ws_url = "ws://localhost:6700"
access_token = "secret"
reconnect_min_ms = 500

[rate_limit]
max_concurrency = 2
min_interval_ms = 50

[stream_server]
host = "127.0.0.1"
port = 9000

[policy]
skip_voice = false
whitelist_groups = [100, 200]

[rpc_retry]
max_attempts = 3
"#;
        let cfg: BrokerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.upstream.access_token, Some("secret".to_string()));
        assert_eq!(cfg.rate_limit.max_concurrency, 2);
        assert_eq!(cfg.stream_server.port, 9000);
        assert!(!cfg.policy.skip_voice);
        assert_eq!(
            cfg.policy.whitelist_groups,
            HashSet::from([100, 200])
        );
        assert_eq!(cfg.rpc_retry.max_attempts, 3);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("BROKER_UPSTREAM_URL", "ws://override:6700");
        std::env::set_var("BROKER_WHITELIST_GROUPS", "1,2,3");

        let mut cfg = BrokerConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.upstream.ws_url, "ws://override:6700");
        assert_eq!(cfg.policy.whitelist_groups, HashSet::from([1, 2, 3]));

        std::env::remove_var("BROKER_UPSTREAM_URL");
        std::env::remove_var("BROKER_WHITELIST_GROUPS");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let cfg = BrokerConfig::load_or_default("/nonexistent/broker.toml");
        assert_eq!(cfg.stream_server.port, 8082);
    }
}
