//! Simulation configuration loading and management.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use pcn_core::{RouterConfig, StrategyConfig};
use pcn_network::NetworkConfig;
use serde::{Deserialize, Serialize};

/// Full description of a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Parameters shared by every router.
    #[serde(default)]
    pub router: RouterConfig,

    /// Transport behaviour.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Strategies of nodes without their own.
    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Cycles to run.
    #[serde(default = "default_cycles")]
    pub cycles: u64,

    /// Time given to in-flight packets after every cycle, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, also used as its wallet address.
    pub name: String,
    /// Overrides the simulation-wide strategy.
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub from: String,
    pub to: String,
    #[serde(default = "default_liquidity")]
    pub from_liquidity: f64,
    #[serde(default = "default_liquidity")]
    pub to_liquidity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log every packet as JSON at trace level.
    #[serde(default)]
    pub packet_traces: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// Default value functions
fn default_cycles() -> u64 {
    20
}
fn default_settle_ms() -> u64 {
    50
}
fn default_liquidity() -> f64 {
    10.0
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            network: NetworkConfig::default(),
            strategy: StrategyConfig::default(),
            logging: LoggingConfig::default(),
            cycles: default_cycles(),
            settle_ms: default_settle_ms(),
            nodes: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            packet_traces: false,
        }
    }
}

impl ChannelConfig {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            from_liquidity: default_liquidity(),
            to_liquidity: default_liquidity(),
        }
    }
}

impl SimulationConfig {
    /// Load config from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: SimulationConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// A small line topology `n0 - n1 - ... - n{len-1}`.
    pub fn line(len: usize) -> Self {
        let nodes: Vec<NodeConfig> = (0..len)
            .map(|i| NodeConfig {
                name: format!("n{i}"),
                strategy: None,
            })
            .collect();
        let channels = nodes
            .windows(2)
            .map(|pair| ChannelConfig::new(pair[0].name.clone(), pair[1].name.clone()))
            .collect();
        Self {
            nodes,
            channels,
            ..Self::default()
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Reject duplicate nodes, channels to unknown nodes and invalid router
    /// parameters.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.router.validate()?;
        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                bail!("duplicate node {}", node.name);
            }
        }
        let mut pairs = HashSet::new();
        for channel in &self.channels {
            for end in [&channel.from, &channel.to] {
                if !names.contains(end.as_str()) {
                    bail!("channel {} - {} references unknown node {end}", channel.from, channel.to);
                }
            }
            if channel.from == channel.to {
                bail!("channel from {} to itself", channel.from);
            }
            let key = if channel.from < channel.to {
                (channel.from.as_str(), channel.to.as_str())
            } else {
                (channel.to.as_str(), channel.from.as_str())
            };
            if !pairs.insert(key) {
                bail!("duplicate channel {} - {}", channel.from, channel.to);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcn_core::{Algorithm, FeeKind};

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.cycles, 20);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.router.cache_size, 30);
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = SimulationConfig::line(3);
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let decoded: SimulationConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(decoded.nodes, config.nodes);
        assert_eq!(decoded.channels, config.channels);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let config = SimulationConfig::load(Path::new("/nonexistent/sim.toml")).unwrap();
        assert_eq!(config.settle_ms, 50);
    }

    #[test]
    fn test_config_from_toml_partial() {
        let toml_str = r#"
cycles = 5

[router.algorithm]
kind = "trust"
radius = 3

[strategy]
fee = "one_percent"

[[nodes]]
name = "a"

[[nodes]]
name = "b"

[[channels]]
from = "a"
to = "b"
from_liquidity = 4.0
"#;
        let config: SimulationConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.cycles, 5);
        assert_eq!(config.strategy.fee, FeeKind::OnePercent);
        assert!(matches!(config.router.algorithm, Algorithm::Trust(ref t) if t.radius == 3));
        assert_eq!(config.channels[0].from_liquidity, 4.0);
        assert_eq!(config.channels[0].to_liquidity, 10.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_topologies() {
        let mut config = SimulationConfig::line(2);
        config.channels.push(ChannelConfig::new("n1", "n0"));
        assert!(config.validate().is_err(), "duplicate channel in reverse orientation");

        let mut config = SimulationConfig::line(2);
        config.channels.push(ChannelConfig::new("n0", "ghost"));
        assert!(config.validate().is_err(), "unknown endpoint");

        let mut config = SimulationConfig::line(2);
        config.nodes.push(NodeConfig {
            name: "n0".into(),
            strategy: None,
        });
        assert!(config.validate().is_err(), "duplicate node");
    }
}
