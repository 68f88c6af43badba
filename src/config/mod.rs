//! BlueNet Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./bluenet.yaml` (current directory - highest priority)
//! 2. `~/.bluenet.yaml` (home directory)
//! 3. `~/.config/bluenet/bluenet.yaml` (user config directory)
//! 4. `/etc/bluenet/bluenet.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority files.
//!
//! # YAML Structure
//!
//! ```yaml
//! node:
//!   identity:
//!     address: "00:1A:7D:DA:71:13"
//!     name: "alice"
//!   control_port: 50000
//! transports:
//!   udp:
//!     bind_addr: "0.0.0.0:4000"
//! peers:
//!   - address: "00:1A:7D:DA:71:14"
//!     transport_addr: "192.168.1.20:4000"
//! ```

mod node;
mod peer;
mod transport;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{IdentityError, Node, NodeAddr};

pub use node::{BuffersConfig, LimitsConfig, NodeConfig};
pub use peer::{ConnectPolicy, PeerConfig};
pub use transport::{TransportsConfig, UdpConfig};

/// Default config filename.
const CONFIG_FILENAME: &str = "bluenet.yaml";

/// Display name used when none is configured.
pub const DEFAULT_USER_NAME: &str = "No one.";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

/// Identity configuration (`node.identity.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Device address (`node.identity.address`).
    /// If not specified, a random locally administered address is generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Display name (`node.identity.name`). Defaults to "No one.".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IdentityConfig {
    /// Get the display name, using default if not configured.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_USER_NAME)
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Adapters (`transports.*`).
    #[serde(default, skip_serializing_if = "TransportsConfig::is_empty")]
    pub transports: TransportsConfig,

    /// Static peers (`peers`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerConfig>,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    /// Missing files are skipped.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("/etc/bluenet").join(CONFIG_FILENAME));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("bluenet").join(CONFIG_FILENAME));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".bluenet.yaml"));
        }

        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present. Scalar
    /// sections with serde defaults count as present when they differ from
    /// the default.
    pub fn merge(&mut self, other: Config) {
        if other.node.identity.address.is_some() {
            self.node.identity.address = other.node.identity.address;
        }
        if other.node.identity.name.is_some() {
            self.node.identity.name = other.node.identity.name;
        }

        let defaults = NodeConfig::default();
        if other.node.control_port != defaults.control_port {
            self.node.control_port = other.node.control_port;
        }
        if other.node.default_ttl != defaults.default_ttl {
            self.node.default_ttl = other.node.default_ttl;
        }
        if other.node.limits != defaults.limits {
            self.node.limits = other.node.limits;
        }
        if other.node.buffers != defaults.buffers {
            self.node.buffers = other.node.buffers;
        }

        self.transports.merge(other.transports);

        // Peers replace as a whole.
        if !other.peers.is_empty() {
            self.peers = other.peers;
        }
    }

    /// Build the local identity from this configuration.
    ///
    /// If no address is configured, a random one is generated.
    pub fn create_node(&self) -> Result<Node, ConfigError> {
        let addr = match &self.node.identity.address {
            Some(addr) => addr.parse::<NodeAddr>()?,
            None => NodeAddr::generate(),
        };
        Ok(Node::new(addr, self.node.identity.name())?)
    }

    /// Check if an address is configured (vs. will be generated).
    pub fn has_address(&self) -> bool {
        self.node.identity.address.is_some()
    }

    /// Get the configured peers.
    pub fn peers(&self) -> &[PeerConfig] {
        &self.peers
    }

    /// Get peers that should auto-connect on startup.
    pub fn auto_connect_peers(&self) -> impl Iterator<Item = &PeerConfig> {
        self.peers.iter().filter(|p| p.is_auto_connect())
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportAddr;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config() {
        let config = Config::new();
        assert!(config.node.identity.address.is_none());
        assert!(!config.has_address());
        assert_eq!(config.node.identity.name(), "No one.");
        assert_eq!(config.node.control_port, 50000);
        assert_eq!(config.node.default_ttl, 16);
        assert!(config.transports.is_empty());
    }

    #[test]
    fn test_parse_yaml_empty() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert!(config.node.identity.address.is_none());
        assert_eq!(config.node.limits.max_sockets, 256);
        assert_eq!(config.node.buffers.command_channel, 64);
    }

    #[test]
    fn test_parse_yaml_partial_sections() {
        let yaml = r#"
node:
  identity:
    name: "alice"
  limits:
    max_sockets: 8
  buffers:
    event_channel: 16
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.node.identity.name(), "alice");
        assert_eq!(config.node.limits.max_sockets, 8);
        assert_eq!(config.node.limits.max_peers, 64);
        assert_eq!(config.node.buffers.event_channel, 16);
        assert_eq!(config.node.buffers.packet_channel, 1024);
    }

    #[test]
    fn test_create_node_from_address() {
        let mut config = Config::new();
        config.node.identity.address = Some("00:1A:7D:DA:71:13".to_string());
        config.node.identity.name = Some("alice".to_string());

        let node = config.create_node().unwrap();
        assert_eq!(node.addr().to_string(), "00:1A:7D:DA:71:13");
        assert_eq!(node.name(), "alice");
    }

    #[test]
    fn test_create_node_generates_address() {
        let config = Config::new();
        let node = config.create_node().unwrap();
        assert_eq!(node.name(), "No one.");
        // Locally administered bit set.
        assert_eq!(node.addr().as_bytes()[0] & 0x02, 0x02);
    }

    #[test]
    fn test_create_node_invalid_address() {
        let mut config = Config::new();
        config.node.identity.address = Some("not-an-address".to_string());
        assert!(matches!(
            config.create_node(),
            Err(ConfigError::Identity(IdentityError::InvalidAddr(_)))
        ));
    }

    #[test]
    fn test_merge_configs() {
        let mut base = Config::new();
        base.node.identity.name = Some("base".to_string());
        base.node.identity.address = Some("00:00:00:00:00:01".to_string());

        let mut override_config = Config::new();
        override_config.node.identity.name = Some("override".to_string());
        override_config.node.control_port = 40000;

        base.merge(override_config);
        assert_eq!(base.node.identity.name(), "override");
        assert_eq!(
            base.node.identity.address.as_deref(),
            Some("00:00:00:00:00:01")
        );
        assert_eq!(base.node.control_port, 40000);
    }

    #[test]
    fn test_merge_transports_field_by_field() {
        let mut base = Config::new();
        base.transports.udp = Some(UdpConfig {
            bind_addr: Some("0.0.0.0:5000".to_string()),
            mtu: Some(1400),
        });

        let mut other = Config::new();
        other.transports.udp = Some(UdpConfig {
            bind_addr: None,
            mtu: Some(1200),
        });

        base.merge(other);
        let udp = base.transports.udp.unwrap();
        assert_eq!(udp.bind_addr(), "0.0.0.0:5000");
        assert_eq!(udp.mtu(), 1200);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bluenet.yaml");

        let yaml = r#"
node:
  identity:
    address: "00:1A:7D:DA:71:13"
"#;
        fs::write(&config_path, yaml).unwrap();

        let config = Config::load_file(&config_path).unwrap();
        assert!(config.has_address());
    }

    #[test]
    fn test_load_file_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.yaml");
        fs::write(&config_path, "node: [unclosed").unwrap();

        assert!(matches!(
            Config::load_file(&config_path),
            Err(ConfigError::ParseYaml { .. })
        ));
    }

    #[test]
    fn test_load_from_paths_later_file_wins() {
        let temp_dir = TempDir::new().unwrap();

        let low_priority = temp_dir.path().join("low.yaml");
        let high_priority = temp_dir.path().join("high.yaml");

        fs::write(
            &low_priority,
            r#"
node:
  identity:
    name: "low"
    address: "00:00:00:00:00:01"
  default_ttl: 4
"#,
        )
        .unwrap();

        fs::write(
            &high_priority,
            r#"
node:
  identity:
    name: "high"
"#,
        )
        .unwrap();

        let paths = vec![low_priority.clone(), high_priority.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(config.node.identity.name(), "high");
        assert_eq!(
            config.node.identity.address.as_deref(),
            Some("00:00:00:00:00:01")
        );
        assert_eq!(config.node.default_ttl, 4);
    }

    #[test]
    fn test_load_skips_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("exists.yaml");
        let missing = temp_dir.path().join("missing.yaml");

        fs::write(
            &existing,
            r#"
node:
  identity:
    name: "present"
"#,
        )
        .unwrap();

        let paths = vec![missing, existing.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], existing);
        assert_eq!(config.node.identity.name(), "present");
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();

        assert!(paths.iter().any(|p| p.ends_with("bluenet.yaml")));
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/etc/bluenet") && p.ends_with("bluenet.yaml")));
        assert_eq!(paths.last(), Some(&PathBuf::from("./bluenet.yaml")));
    }

    #[test]
    fn test_to_yaml_omits_unset() {
        let config = Config::new();
        let yaml = config.to_yaml().unwrap();
        let has_key = |key: &str| yaml.lines().any(|l| l.trim_start().starts_with(key));
        assert!(yaml.lines().any(|l| l.starts_with("node:")));
        assert!(has_key("max_peers:"));
        assert!(!has_key("address:"));
        assert!(!yaml.lines().any(|l| l.starts_with("transports:")));
        assert!(!yaml.lines().any(|l| l.starts_with("peers:")));
    }

    #[test]
    fn test_parse_udp_transport() {
        let yaml = r#"
transports:
  udp:
    bind_addr: "127.0.0.1:4001"
    mtu: 1400
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let udp = config.transports.udp.unwrap();
        assert_eq!(udp.bind_addr(), "127.0.0.1:4001");
        assert_eq!(udp.mtu(), 1400);
    }

    #[test]
    fn test_udp_defaults_and_unknown_field() {
        let udp = UdpConfig::default();
        assert_eq!(udp.bind_addr(), "0.0.0.0:4000");
        assert_eq!(udp.mtu(), 1280);

        let yaml = r#"
transports:
  udp:
    bind: "127.0.0.1:4001"
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_parse_peer_config() {
        let yaml = r#"
peers:
  - address: "00:1A:7D:DA:71:14"
    name: "gateway"
    transport_addr: "192.168.1.1:4000"
    connect_policy: auto_connect
  - address: "00:1A:7D:DA:71:15"
    connect_policy: on_demand
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.peers().len(), 2);
        assert_eq!(config.auto_connect_peers().count(), 1);

        let gateway = &config.peers[0];
        let node = gateway.node().unwrap();
        assert_eq!(node.name(), "gateway");
        assert_eq!(
            gateway.transport_addr().unwrap(),
            TransportAddr::from("192.168.1.1:4000")
        );

        let radio = &config.peers[1];
        assert!(!radio.is_auto_connect());
        assert_eq!(
            radio.transport_addr().unwrap(),
            TransportAddr::from("00:1A:7D:DA:71:15")
        );
    }

    #[test]
    fn test_peer_default_policy() {
        let yaml = r#"
peers:
  - address: "00:1A:7D:DA:71:14"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.peers[0].is_auto_connect());
        assert!(config.peers[0].name.is_none());
    }

    #[test]
    fn test_peer_config_builder() {
        let peer = PeerConfig::new("00:1A:7D:DA:71:14")
            .with_name("relay")
            .with_transport_addr("10.0.0.2:4000")
            .with_policy(ConnectPolicy::OnDemand);

        assert_eq!(peer.name.as_deref(), Some("relay"));
        assert!(!peer.is_auto_connect());
        assert!(peer.node_addr().is_ok());
        assert!(PeerConfig::new("bogus").node().is_err());
    }
}
