//! Router configuration.
//!
//! Every field has a serde default so partial TOML tables are accepted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;
use crate::strategy::{
    Boast, DisclosureStrategy, FeeStrategy, FullDisclosure, NoFee, OnePercentFee,
    PartialDisclosure, Strategy,
};

/// Parameters shared by all routers plus the algorithm-specific block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Capacity of each of the peer and channel caches.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Evict cache entries not accessed for this many cycles.
    #[serde(default)]
    pub cache_expiry: Option<u64>,
    /// Round-trip timeout for routing requests, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// The routing algorithm and its parameters.
    #[serde(default)]
    pub algorithm: Algorithm,
}

/// The four routing algorithms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Algorithm {
    Omniscient(OmniscientConfig),
    Trust(TrustConfig),
    AddressTree(AddressTreeConfig),
    Height(HeightConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmniscientConfig {
    /// Longest path (in hops) the enumeration considers.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Upper bound on returned routes.
    #[serde(default = "default_max_routes")]
    pub max_routes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Flooding radius; route requests start with a TTL of `radius + 1`.
    #[serde(default = "default_radius")]
    pub radius: u32,
    /// Cycles a routing-table entry stays valid.
    #[serde(default = "default_route_lifetime")]
    pub route_lifetime: u64,
}

/// How DHT requests are steered when the exact subtree is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFilling {
    /// Skip an empty level by toggling its bit and descending.
    #[default]
    Dart,
    /// Clear low-order bits of the anchor until a populated level is hit.
    ZeroLowerBits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressTreeConfig {
    /// Number of bits in a routing address.
    #[serde(default = "default_addr_size")]
    pub addr_size: u32,
    /// Cycles between neighbor advertisements.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Forwarding budget; defaults to twice the address size.
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub gap_filling: GapFilling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightConfig {
    /// Budget of query, update and route-forwarding hops.
    #[serde(default = "default_height_ttl")]
    pub ttl: i64,
}

/// Which stock strategies a node runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub fee: FeeKind,
    #[serde(default)]
    pub disclosure: DisclosureKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    #[default]
    NoFee,
    OnePercent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclosureKind {
    #[default]
    Full,
    Partial,
    Boast,
}

// Default value functions
fn default_cache_size() -> usize {
    30
}
fn default_request_timeout_ms() -> u64 {
    500
}
fn default_max_hops() -> usize {
    10
}
fn default_max_routes() -> usize {
    10
}
fn default_radius() -> u32 {
    10
}
fn default_route_lifetime() -> u64 {
    20
}
fn default_addr_size() -> u32 {
    8
}
fn default_refresh_interval() -> u64 {
    5
}
fn default_height_ttl() -> i64 {
    16
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            cache_expiry: None,
            request_timeout_ms: default_request_timeout_ms(),
            algorithm: Algorithm::default(),
        }
    }
}

impl RouterConfig {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject parameter combinations no router can run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cache_size == 0 {
            return Err(CoreError::InvalidConfig("cache_size must be at least 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig("request_timeout_ms must be positive".into()));
        }
        match &self.algorithm {
            Algorithm::AddressTree(c) if c.addr_size == 0 || c.addr_size > 31 => Err(
                CoreError::InvalidConfig(format!("addr_size must be in 1..=31, got {}", c.addr_size)),
            ),
            Algorithm::AddressTree(c) if c.refresh_interval == 0 => Err(CoreError::InvalidConfig(
                "refresh_interval must be positive".into(),
            )),
            Algorithm::Omniscient(c) if c.max_hops == 0 => {
                Err(CoreError::InvalidConfig("max_hops must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Omniscient(OmniscientConfig::default())
    }
}

impl Default for OmniscientConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            max_routes: default_max_routes(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            route_lifetime: default_route_lifetime(),
        }
    }
}

impl TrustConfig {
    /// Route lifetime scaled with the population (one cycle per node).
    pub fn for_network_size(nodes: usize) -> Self {
        Self {
            route_lifetime: (nodes as u64).max(1),
            ..Self::default()
        }
    }
}

impl Default for AddressTreeConfig {
    fn default() -> Self {
        Self {
            addr_size: default_addr_size(),
            refresh_interval: default_refresh_interval(),
            ttl: None,
            gap_filling: GapFilling::default(),
        }
    }
}

impl AddressTreeConfig {
    /// Address size `round(log2(n) + 1.5)`, leaving headroom above the
    /// minimum number of bits needed to address `nodes`.
    pub fn for_network_size(nodes: usize) -> Self {
        let n = nodes.max(1) as f64;
        let addr_size = (n.log2() + 1.5).round().clamp(1.0, 31.0) as u32;
        Self {
            addr_size,
            ..Self::default()
        }
    }

    pub fn ttl(&self) -> u32 {
        self.ttl.unwrap_or(self.addr_size * 2)
    }
}

impl Default for HeightConfig {
    fn default() -> Self {
        Self {
            ttl: default_height_ttl(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fee: FeeKind::default(),
            disclosure: DisclosureKind::default(),
        }
    }
}

impl StrategyConfig {
    /// Instantiate the configured stock strategies.
    pub fn build(&self) -> Strategy {
        let fee: Arc<dyn FeeStrategy> = match self.fee {
            FeeKind::NoFee => Arc::new(NoFee),
            FeeKind::OnePercent => Arc::new(OnePercentFee),
        };
        let disclosure: Arc<dyn DisclosureStrategy> = match self.disclosure {
            DisclosureKind::Full => Arc::new(FullDisclosure),
            DisclosureKind::Partial => Arc::new(PartialDisclosure),
            DisclosureKind::Boast => Arc::new(Boast),
        };
        Strategy::new(fee, disclosure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert_eq!(config.cache_size, 30);
        assert_eq!(config.request_timeout(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_address_size_scales_with_population() {
        assert_eq!(AddressTreeConfig::for_network_size(16).addr_size, 6);
        assert_eq!(AddressTreeConfig::for_network_size(100).addr_size, 8);
        let config = AddressTreeConfig::for_network_size(16);
        assert_eq!(config.ttl(), 12);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let raw = r#"
            cache_size = 5

            [algorithm]
            kind = "address_tree"
            addr_size = 4
        "#;
        let config: RouterConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.cache_size, 5);
        assert_eq!(config.request_timeout_ms, 500);
        match config.algorithm {
            Algorithm::AddressTree(c) => {
                assert_eq!(c.addr_size, 4);
                assert_eq!(c.refresh_interval, 5);
                assert_eq!(c.gap_filling, GapFilling::Dart);
                assert_eq!(c.ttl(), 8);
            }
            other => panic!("unexpected algorithm {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_oversized_address() {
        let config = RouterConfig::new(Algorithm::AddressTree(AddressTreeConfig {
            addr_size: 40,
            ..AddressTreeConfig::default()
        }));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_config_builds_one_percent() {
        let strategy = StrategyConfig {
            fee: FeeKind::OnePercent,
            disclosure: DisclosureKind::Full,
        }
        .build();
        let fee = strategy.fee_toward(&crate::WalletAddress::new("x"));
        assert!((fee.rate - 1.01).abs() < 1e-12);
    }
}
