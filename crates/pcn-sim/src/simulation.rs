//! The simulation driver: one router per node on a shared [`SimNetwork`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::future::join_all;
use pcn_core::{
    NetworkAddress, Peer, PublicKey, RouterConfig, StaticChannelInformation, StrategyConfig,
    WalletAddress,
};
use pcn_network::{NetworkConfig, SimNetwork};
use pcn_routing::{build_router, GlobalView, Route, Router, RouterSetup, RoutingMessage};

use crate::config::SimulationConfig;

/// A simulated node and its router.
#[derive(Clone)]
pub struct Node {
    pub peer: Peer,
    pub router: Arc<dyn Router>,
}

/// Owns the network, the routers and the cycle counter.
///
/// Channel changes are pushed to both endpoints, mirroring how the two
/// parties of a real channel learn about it.
pub struct Simulation {
    network: Arc<SimNetwork<RoutingMessage>>,
    view: Arc<GlobalView>,
    router_config: RouterConfig,
    settle: Duration,
    nodes: BTreeMap<WalletAddress, Node>,
    cycle: u64,
}

impl Simulation {
    /// An empty simulation. Must be called inside a tokio runtime once nodes
    /// are added, since routers spawn their packet listeners.
    pub fn new(router_config: RouterConfig, network_config: NetworkConfig) -> Self {
        Self {
            network: SimNetwork::new(network_config),
            view: GlobalView::new(),
            router_config,
            settle: Duration::from_millis(50),
            nodes: BTreeMap::new(),
            cycle: 0,
        }
    }

    /// Build every node and channel of `config`.
    pub async fn from_config(config: &SimulationConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let mut sim = Self::new(config.router.clone(), config.network.clone())
            .with_settle(config.settle());
        for node in &config.nodes {
            let strategy = node.strategy.as_ref().unwrap_or(&config.strategy);
            sim.add_node(&node.name, strategy)?;
        }
        for channel in &config.channels {
            sim.open_channel(
                &channel.from,
                channel.from_liquidity,
                &channel.to,
                channel.to_liquidity,
            )
            .await?;
        }
        tracing::info!(
            nodes = sim.nodes.len(),
            channels = config.channels.len(),
            "simulation ready"
        );
        Ok(sim)
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Connect a new node named `name` and start its router.
    pub fn add_node(&mut self, name: &str, strategy: &StrategyConfig) -> anyhow::Result<Peer> {
        let wallet = WalletAddress::new(name);
        if self.nodes.contains_key(&wallet) {
            return Err(anyhow!("node {name} already exists"));
        }
        let peer = Peer::new(
            name,
            PublicKey::from_bytes(uuid::Uuid::now_v7().as_bytes().to_vec()),
            wallet.clone(),
            NetworkAddress::new(format!("sim://{name}")),
        );
        let socket = self
            .network
            .connect(peer.network_address.clone())
            .with_context(|| format!("connecting {name}"))?;
        let setup = RouterSetup::new(peer.clone(), Arc::new(socket))
            .with_strategy(strategy.build())
            .with_config(self.router_config.clone());
        let router = build_router(setup, &self.view).with_context(|| format!("starting router of {name}"))?;
        tracing::debug!(%wallet, "node added");
        self.nodes.insert(
            wallet,
            Node {
                peer: peer.clone(),
                router,
            },
        );
        Ok(peer)
    }

    /// Open (or re-fund) the channel between `a` and `b` and tell both
    /// routers.
    pub async fn open_channel(
        &self,
        a: &str,
        a_liquidity: f64,
        b: &str,
        b_liquidity: f64,
    ) -> anyhow::Result<()> {
        let (node_a, node_b) = (self.node(a)?, self.node(b)?);
        let channel = StaticChannelInformation::new(
            node_a.peer.wallet_address.clone(),
            a_liquidity,
            node_b.peer.wallet_address.clone(),
            b_liquidity,
        );
        node_a
            .router
            .add_or_update_channel(channel.clone(), node_b.peer.clone())
            .await
            .with_context(|| format!("{a} adding channel to {b}"))?;
        node_b
            .router
            .add_or_update_channel(channel, node_a.peer.clone())
            .await
            .with_context(|| format!("{b} adding channel to {a}"))?;
        Ok(())
    }

    /// Close the channel between `a` and `b` on both sides.
    pub async fn close_channel(&self, a: &str, b: &str) -> anyhow::Result<()> {
        let (node_a, node_b) = (self.node(a)?, self.node(b)?);
        node_a
            .router
            .remove_channel(&node_b.peer.wallet_address)
            .await
            .with_context(|| format!("{a} removing channel to {b}"))?;
        node_b
            .router
            .remove_channel(&node_a.peer.wallet_address)
            .await
            .with_context(|| format!("{b} removing channel to {a}"))?;
        Ok(())
    }

    /// Advance every router by one cycle and let the resulting traffic
    /// settle. Returns the new cycle number.
    pub async fn cycle(&mut self) -> anyhow::Result<u64> {
        self.cycle += 1;
        let cycle = self.cycle;
        let results = join_all(self.nodes.values().map(|n| n.router.cycle(cycle))).await;
        for (wallet, result) in self.nodes.keys().zip(results) {
            result.with_context(|| format!("cycle {cycle} of {wallet}"))?;
        }
        tokio::time::sleep(self.settle).await;
        Ok(cycle)
    }

    /// Run `cycles` cycles.
    pub async fn run(&mut self, cycles: u64) -> anyhow::Result<()> {
        for _ in 0..cycles {
            self.cycle().await?;
        }
        tracing::info!(cycle = self.cycle, "simulation cycles done");
        Ok(())
    }

    /// Routes from `from` to `to` as discovered by `from`'s router.
    pub async fn find_routes(&self, from: &str, to: &str) -> anyhow::Result<Vec<Route>> {
        let target = WalletAddress::new(to);
        Ok(self.node(from)?.router.find_routes(&target).await?)
    }

    pub fn node(&self, name: &str) -> anyhow::Result<&Node> {
        self.nodes
            .get(&WalletAddress::new(name))
            .ok_or_else(|| anyhow!("unknown node {name}"))
    }

    pub fn router(&self, name: &str) -> anyhow::Result<&Arc<dyn Router>> {
        Ok(&self.node(name)?.router)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn network(&self) -> &Arc<SimNetwork<RoutingMessage>> {
        &self.network
    }

    pub fn view(&self) -> &Arc<GlobalView> {
        &self.view
    }

    pub fn current_cycle(&self) -> u64 {
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcn_core::{Algorithm, TrustConfig};

    #[tokio::test(start_paused = true)]
    async fn test_line_from_config() {
        let sim = Simulation::from_config(&SimulationConfig::line(3)).await.unwrap();
        assert_eq!(sim.nodes().count(), 3);
        let routes = sim.find_routes("n0", "n2").await.unwrap();
        assert!(!routes.is_empty());
        assert_eq!(routes[0].hop_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_node_rejected() {
        let mut sim = Simulation::new(RouterConfig::default(), NetworkConfig::default());
        sim.add_node("a", &StrategyConfig::default()).unwrap();
        assert!(sim.add_node("a", &StrategyConfig::default()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_channel_reaches_both_routers() {
        let mut config = SimulationConfig::line(2);
        config.router = RouterConfig::new(Algorithm::Trust(TrustConfig::default()));
        let sim = Simulation::from_config(&config).await.unwrap();
        sim.close_channel("n0", "n1").await.unwrap();
        for node in sim.nodes() {
            assert!(
                node.router.known_channels().is_empty(),
                "{} still knows the closed channel",
                node.peer.wallet_address
            );
        }
        assert!(sim.close_channel("n0", "n1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_advance() {
        let mut sim = Simulation::from_config(&SimulationConfig::line(2)).await.unwrap();
        sim.run(3).await.unwrap();
        assert_eq!(sim.current_cycle(), 3);
    }
}
