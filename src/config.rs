//! Configuration management for PeerChain
//!
//! Settings come from an optional TOML file, then command-line overrides.

use crate::error::ChainError;
use crate::miner::{ProofOfWork, DEFAULT_DIFFICULTY};
use crate::network::DEFAULT_PEER_TIMEOUT;
use crate::peers::{parse_addresses, PeerAddress};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    #[serde(default = "default_gossip")]
    pub gossip: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    #[serde(default = "default_reward")]
    pub reward: f64,
    /// Recipient of block rewards; a random identifier when unset.
    #[serde(default)]
    pub node_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: NetworkConfig::default(),
            miner: MinerConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: default_host(),
            port: default_port(),
            peers: Vec::new(),
            peer_timeout_ms: default_peer_timeout_ms(),
            gossip: default_gossip(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            difficulty: default_difficulty(),
            reward: default_reward(),
            node_id: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_peer_timeout_ms() -> u64 {
    DEFAULT_PEER_TIMEOUT.as_millis() as u64
}

fn default_gossip() -> bool {
    true
}

fn default_difficulty() -> usize {
    DEFAULT_DIFFICULTY
}

fn default_reward() -> f64 {
    1.0
}

/// Command-line flags for `peerchain-node`.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "peerchain-node", about = "Run a PeerChain ledger node")]
pub struct NodeArgs {
    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Host address of this node
    #[arg(long)]
    pub host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Comma-separated list of peer addresses in host:port format
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,
    /// Number of leading zero hex characters required by proof of work
    #[arg(long)]
    pub difficulty: Option<usize>,
    /// Identifier credited with mining rewards
    #[arg(long)]
    pub node_id: Option<String>,
}

impl Config {
    /// Read `path` if given; defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Config, ChainError> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    ChainError::ConfigError(format!("cannot read {}: {}", path.display(), e))
                })?;
                toml::from_str(&raw)?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `args` and apply the remaining flags on top.
    pub fn from_args(args: &NodeArgs) -> Result<Config, ChainError> {
        let mut config = Config::load(args.config.as_deref())?;
        if let Some(host) = &args.host {
            config.network.host = host.clone();
        }
        if let Some(port) = args.port {
            config.network.port = port;
        }
        let extra: Vec<String> = args
            .peers
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        config.network.peers.extend(extra);
        if let Some(difficulty) = args.difficulty {
            config.miner.difficulty = difficulty;
        }
        if let Some(node_id) = &args.node_id {
            config.miner.node_id = Some(node_id.clone());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        ProofOfWork::new(self.miner.difficulty)?;
        if !self.miner.reward.is_finite() || self.miner.reward < 0.0 {
            return Err(ChainError::ConfigError(
                "miner.reward must be a non-negative number".to_string(),
            ));
        }
        if let Some(id) = &self.miner.node_id {
            if id.trim().is_empty() {
                return Err(ChainError::ConfigError("miner.node_id must not be empty".to_string()));
            }
        }
        if self.network.peer_timeout_ms == 0 {
            return Err(ChainError::ConfigError(
                "network.peer_timeout_ms must be positive".to_string(),
            ));
        }
        self.local_address()?;
        parse_addresses(self.network.peers.as_slice())?;
        Ok(())
    }

    pub fn local_address(&self) -> Result<PeerAddress, ChainError> {
        PeerAddress::new(self.network.host.clone(), self.network.port)
    }

    pub fn bootstrap_peers(&self) -> Result<Vec<PeerAddress>, ChainError> {
        parse_addresses(self.network.peers.as_slice())
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.network.peer_timeout_ms)
    }

    pub fn proof_of_work(&self) -> Result<ProofOfWork, ChainError> {
        ProofOfWork::new(self.miner.difficulty)
    }

    /// Configured node id, or a fresh random 32-hex-character one.
    pub fn node_id(&self) -> String {
        self.miner
            .node_id
            .clone()
            .unwrap_or_else(|| hex::encode(rand::random::<[u8; 16]>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.network.host, "127.0.0.1");
        assert_eq!(config.network.port, 5000);
        assert_eq!(config.miner.difficulty, 4);
        assert!(config.network.gossip);
        assert_eq!(config.node_id().len(), 32);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[network]
port = 6001
peers = ["127.0.0.1:6002", "http://127.0.0.1:6003"]

[miner]
difficulty = 2
node_id = "alpha"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.network.port, 6001);
        assert_eq!(config.network.host, "127.0.0.1");
        assert_eq!(config.bootstrap_peers().unwrap().len(), 2);
        assert_eq!(config.miner.difficulty, 2);
        assert_eq!(config.node_id(), "alpha");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[miner]\ndifficulty = 0").unwrap();
        assert!(Config::load(Some(file.path())).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[network]\npeers = [\"nonsense\"]").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = NodeArgs::parse_from([
            "peerchain-node",
            "--port",
            "7000",
            "--peers",
            "127.0.0.1:7001, 127.0.0.1:7002",
            "--difficulty",
            "3",
        ]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.network.peers, vec!["127.0.0.1:7001", "127.0.0.1:7002"]);
        assert_eq!(config.miner.difficulty, 3);
    }
}
