//! Node configuration: network profiles (magic, seeds) and runtime
//! settings, loadable from a TOML file or defaulted per network.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Current configuration schema version.
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which arca network this node joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Arca main network (magic spells "ARCA").
    #[default]
    MainNet,
    TestNet,
    /// Private/local network.
    Private,
}

impl NetworkType {
    /// The frame magic for this network.
    pub fn magic(&self) -> u32 {
        match self {
            NetworkType::MainNet => 0x4143_5241, // "ARCA" LE
            NetworkType::TestNet => 0x5443_5241, // "ARCT" LE
            NetworkType::Private => 0x0102_0304,
        }
    }

    /// Well-known entry points.
    pub fn seed_nodes(&self) -> Vec<String> {
        match self {
            NetworkType::MainNet => vec![
                "seed1.arca.network:4004".to_string(),
                "seed2.arca.network:4004".to_string(),
                "seed3.arca.network:4004".to_string(),
            ],
            NetworkType::TestNet => vec![
                "seed1t.arca.network:14004".to_string(),
                "seed2t.arca.network:14004".to_string(),
            ],
            NetworkType::Private => vec![],
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            NetworkType::MainNet => 4004,
            NetworkType::TestNet => 14_004,
            NetworkType::Private => 24_004,
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::MainNet => write!(f, "mainnet"),
            NetworkType::TestNet => write!(f, "testnet"),
            NetworkType::Private => write!(f, "private"),
        }
    }
}

/// Everything the node binary needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkType,
    /// Custom magic, overriding the network default.
    pub magic: Option<u32>,
    pub listen: Option<SocketAddr>,
    /// Peers to dial at startup, `host:port`; defaults to the network
    /// seed list.
    pub peers: Vec<String>,
    pub max_peers: usize,
    pub user_agent: String,
    pub blocks_per_request: u32,
    pub mempool_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_for_network(NetworkType::MainNet)
    }
}

impl Settings {
    pub fn default_for_network(network: NetworkType) -> Self {
        Self {
            network,
            magic: None,
            listen: None,
            peers: network.seed_nodes(),
            max_peers: 32,
            user_agent: format!("arca/{}", env!("CARGO_PKG_VERSION")),
            blocks_per_request: 100,
            mempool_capacity: 8_192,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Effective frame magic: explicit override or the network default.
    pub fn magic(&self) -> u32 {
        self.magic.unwrap_or_else(|| self.network.magic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_network() {
        let settings = Settings::default_for_network(NetworkType::TestNet);
        assert_eq!(settings.magic(), NetworkType::TestNet.magic());
        assert_eq!(settings.peers, NetworkType::TestNet.seed_nodes());
    }

    #[test]
    fn magic_override_wins() {
        let mut settings = Settings::default();
        settings.magic = Some(0xDEAD_BEEF);
        assert_eq!(settings.magic(), 0xDEAD_BEEF);
    }

    #[test]
    fn parses_partial_toml() {
        let settings: Settings = toml::from_str(
            r#"
            network = "private"
            max_peers = 4
            "#,
        )
        .unwrap();
        assert_eq!(settings.network, NetworkType::Private);
        assert_eq!(settings.max_peers, 4);
        assert_eq!(settings.blocks_per_request, 100);
    }

    #[test]
    fn network_magics_are_distinct() {
        assert_ne!(NetworkType::MainNet.magic(), NetworkType::TestNet.magic());
        assert_ne!(NetworkType::MainNet.magic(), NetworkType::Private.magic());
    }
}
