// Configuration management for the oracle node binary
//
// Optional JSON file, then environment overrides, then command-line flags.
// Default file location:
// - macOS: ~/Library/Application Support/oracle-node/config.json
// - Linux: ~/.config/oracle-node/config.json
// - Windows: %APPDATA%\oracle-node\config.json

use crate::bootstrap::{default_bootstrap_nodes, parse_bootstrap_list};
use anyhow::{Context, Result};
use libp2p::Multiaddr;
use oracle_core::NodeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "oracle-node";

/// Listen port
pub const ENV_PORT: &str = "portNbr";
/// TLS certificate path for the webhook listener
pub const ENV_CERT: &str = "cert";
/// TLS private key path for the webhook listener
pub const ENV_CERT_KEY: &str = "certPem";
/// Comma-separated bootstrap multiaddrs
pub const ENV_PEER_LIST: &str = "peerList";
pub const ENV_KEY_FILE: &str = "keyFile";
pub const ENV_WEBHOOK_TOKEN: &str = "webhookToken";
pub const ENV_WEBHOOK_PORT: &str = "webhookPort";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP listen port, 0 picks a free one
    pub listen_port: u16,

    /// Private key file; defaults to `<data dir>/private.key`
    pub key_file: Option<String>,

    /// Bootstrap nodes for initial network connection
    pub bootstrap_nodes: Vec<String>,

    pub webhook: WebhookConfig,

    /// Network settings
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret expected in the Authorization header; no token, no server
    pub token: Option<String>,
    pub port: u16,
    pub cert: Option<String>,
    pub cert_key: Option<String>,
    /// TLS for the webhook is terminated by a proxy in front of this node.
    /// Required when `cert`/`cert_key` are set, since the listener itself
    /// speaks plain HTTP.
    pub tls_upstream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub heartbeat_interval_secs: u64,
    pub fanout_interval_secs: u64,
    pub enable_fanout: bool,
    pub bootstrap_timeout_secs: u64,
    pub announce_interval_secs: u64,
    pub provider_ttl_secs: u64,
    pub discovery_interval_secs: u64,
    pub discovery_timeout_secs: u64,
    pub max_peers_per_round: usize,
    pub worker_status_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 0,
            key_file: None,
            bootstrap_nodes: default_bootstrap_nodes(),
            webhook: WebhookConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            token: None,
            port: 8080,
            cert: None,
            cert_key: None,
            tls_upstream: false,
        }
    }
}

impl WebhookConfig {
    /// Refuse certificate settings the listener would not honour
    pub fn check_tls(&self) -> Result<()> {
        match (&self.cert, &self.cert_key) {
            (None, None) => Ok(()),
            (Some(_), None) | (None, Some(_)) => anyhow::bail!(
                "Webhook TLS needs both {} and {}",
                ENV_CERT,
                ENV_CERT_KEY
            ),
            (Some(cert), Some(_)) if !self.tls_upstream => anyhow::bail!(
                "Webhook certificate {} is configured but the webhook listener serves plain HTTP; \
                 terminate TLS in a fronting proxy and set webhook.tls_upstream, or unset {}/{}",
                cert,
                ENV_CERT,
                ENV_CERT_KEY
            ),
            (Some(_), Some(_)) => Ok(()),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let node = NodeConfig::default();
        Self {
            heartbeat_interval_secs: node.heartbeat_interval.as_secs(),
            fanout_interval_secs: node.fanout_interval.as_secs(),
            enable_fanout: node.enable_fanout,
            bootstrap_timeout_secs: node.bootstrap_timeout.as_secs(),
            announce_interval_secs: node.announce_interval.as_secs(),
            provider_ttl_secs: node.provider_ttl.as_secs(),
            discovery_interval_secs: node.discovery_interval.as_secs(),
            discovery_timeout_secs: node.discovery_timeout.as_secs(),
            max_peers_per_round: node.max_peers_per_round,
            worker_status_capacity: node.worker_status_capacity,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Failed to determine config directory")?
            .join(APP_DIR))
    }

    /// Get the data directory path, creating it if needed
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join(APP_DIR);

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from an explicit file, or the default location if present.
    /// An explicit path that does not exist is an error; a missing default
    /// file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_file()?, false),
        };

        if !config_file.exists() {
            if required {
                anyhow::bail!("Config file not found: {}", config_file.display());
            }
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(&config_file)
            .with_context(|| format!("Failed to read config file {}", config_file.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", config_file.display()))?;
        Ok(config)
    }

    /// Overlay values from the process environment
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`. Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get(ENV_PORT) {
            self.listen_port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_PORT, port))?;
        }
        if let Some(list) = get(ENV_PEER_LIST) {
            self.bootstrap_nodes = parse_bootstrap_list(&list);
        }
        if let Some(key_file) = get(ENV_KEY_FILE) {
            self.key_file = Some(key_file);
        }
        if let Some(token) = get(ENV_WEBHOOK_TOKEN) {
            self.webhook.token = Some(token);
        }
        if let Some(port) = get(ENV_WEBHOOK_PORT) {
            self.webhook.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_WEBHOOK_PORT, port))?;
        }
        if let Some(cert) = get(ENV_CERT) {
            self.webhook.cert = Some(cert);
        }
        if let Some(key) = get(ENV_CERT_KEY) {
            self.webhook.cert_key = Some(key);
        }
        Ok(())
    }

    fn key_path(&self) -> Result<PathBuf> {
        match &self.key_file {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("private.key")),
        }
    }

    /// Build and validate the node configuration
    pub fn to_node_config(&self, heartbeat_target: Option<Multiaddr>) -> Result<NodeConfig> {
        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", self.listen_port)
            .parse()
            .context("Invalid listen address")?;

        let bootstrap_peers = self
            .bootstrap_nodes
            .iter()
            .map(|node| {
                node.parse::<Multiaddr>()
                    .with_context(|| format!("Invalid bootstrap address: {}", node))
            })
            .collect::<Result<Vec<_>>>()?;

        let net = &self.network;
        let config = NodeConfig {
            key_path: self.key_path()?,
            listen_addr,
            bootstrap_peers,
            heartbeat_target,
            heartbeat_interval: Duration::from_secs(net.heartbeat_interval_secs),
            fanout_interval: Duration::from_secs(net.fanout_interval_secs),
            enable_fanout: net.enable_fanout,
            bootstrap_timeout: Duration::from_secs(net.bootstrap_timeout_secs),
            announce_interval: Duration::from_secs(net.announce_interval_secs),
            provider_ttl: Duration::from_secs(net.provider_ttl_secs),
            discovery_interval: Duration::from_secs(net.discovery_interval_secs),
            discovery_timeout: Duration::from_secs(net.discovery_timeout_secs),
            max_peers_per_round: net.max_peers_per_round,
            worker_status_capacity: net.worker_status_capacity,
            ..NodeConfig::default()
        };

        config.validate().context("Invalid node configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_port, 0);
        assert_eq!(config.webhook.port, 8080);
        assert!(config.webhook.token.is_none());
        assert!(config.network.enable_fanout);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"listen_port": 4001, "webhook": {"token": "s3cret"}}"#).unwrap();
        assert_eq!(config.listen_port, 4001);
        assert_eq!(config.webhook.token.as_deref(), Some("s3cret"));
        assert_eq!(config.webhook.port, 8080);
        assert_eq!(config.network.max_peers_per_round, 64);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("portNbr", "4001"),
                ("peerList", "/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWA, /ip4/10.0.0.2/tcp/4001/p2p/12D3KooWB"),
                ("keyFile", "/var/lib/oracle/private.key"),
                ("webhookToken", "s3cret"),
                ("webhookPort", "9090"),
                ("cert", "/etc/oracle/cert.pem"),
                ("certPem", "/etc/oracle/key.pem"),
            ]))
            .unwrap();

        assert_eq!(config.listen_port, 4001);
        assert_eq!(config.bootstrap_nodes.len(), 2);
        assert_eq!(config.key_file.as_deref(), Some("/var/lib/oracle/private.key"));
        assert_eq!(config.webhook.token.as_deref(), Some("s3cret"));
        assert_eq!(config.webhook.port, 9090);
        assert_eq!(config.webhook.cert.as_deref(), Some("/etc/oracle/cert.pem"));
        assert_eq!(config.webhook.cert_key.as_deref(), Some("/etc/oracle/key.pem"));
    }

    #[test]
    fn test_empty_env_is_ignored() {
        let mut config = Config::default();
        config.listen_port = 4001;
        config.apply_env(env(&[("portNbr", ""), ("webhookToken", "  ")])).unwrap();
        assert_eq!(config.listen_port, 4001);
        assert!(config.webhook.token.is_none());
    }

    #[test]
    fn test_certificate_without_tls_termination_is_refused() {
        let mut webhook = WebhookConfig::default();
        assert!(webhook.check_tls().is_ok());

        webhook.cert = Some("/etc/oracle/cert.pem".to_string());
        let err = webhook.check_tls().unwrap_err().to_string();
        assert!(err.contains("certPem"), "{}", err);

        webhook.cert_key = Some("/etc/oracle/key.pem".to_string());
        let err = webhook.check_tls().unwrap_err().to_string();
        assert!(err.contains("plain HTTP"), "{}", err);

        webhook.tls_upstream = true;
        assert!(webhook.check_tls().is_ok());
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[("portNbr", "http")])).is_err());
        assert!(config.apply_env(env(&[("webhookPort", "70000")])).is_err());
    }

    #[test]
    fn test_to_node_config() {
        let config = Config {
            listen_port: 4001,
            key_file: Some("/tmp/oracle.key".to_string()),
            bootstrap_nodes: vec![
                "/ip4/127.0.0.1/tcp/4002/p2p/12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN"
                    .to_string(),
            ],
            ..Config::default()
        };

        let node = config.to_node_config(None).unwrap();
        assert_eq!(node.listen_addr.to_string(), "/ip4/0.0.0.0/tcp/4001");
        assert_eq!(node.key_path, PathBuf::from("/tmp/oracle.key"));
        assert_eq!(node.bootstrap_peers.len(), 1);
        assert_eq!(node.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_bootstrap_address() {
        let config = Config {
            key_file: Some("/tmp/oracle.key".to_string()),
            bootstrap_nodes: vec!["not-a-multiaddr".to_string()],
            ..Config::default()
        };
        assert!(config.to_node_config(None).is_err());
    }

    #[test]
    fn test_zero_interval_fails_validation() {
        let mut config = Config {
            key_file: Some("/tmp/oracle.key".to_string()),
            ..Config::default()
        };
        config.network.heartbeat_interval_secs = 0;
        assert!(config.to_node_config(None).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{"bootstrap_nodes": [], "network": {"enable_fanout": false}}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.bootstrap_nodes.is_empty());
        assert!(!config.network.enable_fanout);

        assert!(Config::load(Some(&dir.path().join("missing.json"))).is_err());
    }
}
