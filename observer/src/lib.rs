//! Follow a two-player shuffle game from the point of view of one client.
//!
//! A [Session] derives game status and shuffle progress from an initial chain
//! read plus contract events, and decides when the local player must submit
//! its shuffle. An [Engine] drives one session from an event bridge and exposes
//! it to the application through a [Mailbox].

mod condition;
pub mod engine;
mod ingress;
pub mod replay;
pub mod session;

pub use condition::Condition;
pub use engine::{Engine, EngineConfig, SessionConfig, Snapshot};
pub use ingress::Mailbox;
pub use replay::{replay, Replay};
pub use session::{Applied, Link, Session, SessionError, ShuffleProgress, ShuffleStatus};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use shuffle_client::EvmConfig;
use shuffle_types::{parse_address, Address, GameId, GameStatus};
use std::{path::Path, time::Duration};

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_log_range() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration for the observer (from config file)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Game contract address. Not needed for replays.
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub game_id: Option<GameId>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub joiner: Option<String>,
    /// Address of the connected wallet.
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_log_range")]
    pub log_range: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    /// Status a replay starts from (and returns to after a rematch).
    #[serde(default)]
    pub initial_status: Option<GameStatus>,
}

fn address(field: &str, value: Option<&str>) -> Result<Option<Address>> {
    value
        .map(|value| parse_address(value).with_context(|| format!("invalid {field} address")))
        .transpose()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        serde_yaml::from_str(&contents).context("could not parse config file")
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            game_id: self.game_id,
            creator: address("creator", self.creator.as_deref())?,
            joiner: address("joiner", self.joiner.as_deref())?,
            local: address("local", self.local.as_deref())?,
        })
    }

    pub fn evm_config(&self) -> Result<EvmConfig> {
        let contract = address("contract", self.contract.as_deref())?
            .ok_or_else(|| anyhow!("contract address is required"))?;
        let mut config = EvmConfig::new(&self.rpc_url, contract);
        config.start_block = self.start_block;
        config.log_range = self.log_range;
        config.poll_interval = Duration::from_millis(self.poll_interval_ms);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
rpc_url: http://localhost:9545
contract: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
game_id: 7
creator: "0xC1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1"
joiner: "0x0101010101010101010101010101010101010101"
local: "0x0101010101010101010101010101010101010101"
start_block: 100
log_level: debug
initial_status: SHUFFLING
"#;

    #[test]
    fn test_parse_config() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        assert_eq!(config.game_id, Some(GameId(7)));
        assert_eq!(config.poll_interval_ms, 2_000);
        assert!(!config.json_logs);
        assert_eq!(config.initial_status, Some(GameStatus::Shuffling));

        let session = config.session_config().unwrap().session().unwrap();
        assert_eq!(session.role(), shuffle_types::Role::Joiner);

        let evm = config.evm_config().unwrap();
        assert_eq!(evm.start_block, 100);
        assert_eq!(evm.rpc_url, "http://localhost:9545");
        assert_eq!(evm.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_minimal_config() {
        let config: Config = serde_yaml::from_str("game_id: 1").unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.evm_config().is_err());
        assert_eq!(
            config.session_config().unwrap().session().err(),
            Some(Condition::NoGameSpecified)
        );
    }

    #[test]
    fn test_invalid_address() {
        let config: Config = serde_yaml::from_str("creator: nope").unwrap();
        let err = config.session_config().unwrap_err();
        assert!(err.to_string().contains("creator"));
    }
}
