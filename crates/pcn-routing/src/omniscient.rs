//! Baseline router backed by a global view of the whole network.
//!
//! The [`GlobalView`] is a simulation-only oracle shared by every
//! omniscient router. Path enumeration uses it directly; the fee and
//! disclosed liquidity of every intermediate hop are still asked from the
//! node that owns the hop, so strategies and transport failures apply.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use pcn_core::{
    ChannelFee, DynamicChannelInformation, OmniscientConfig, Peer, StaticChannelInformation,
    WalletAddress,
};
use pcn_network::Packet;
use serde::{Deserialize, Serialize};

use crate::base::{RouterBase, RouterSetup};
use crate::error::RoutingError;
use crate::protocol::RoutingMessage;
use crate::route::Route;
use crate::router::{spawn_listener, PacketHandler, Router};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OmniscientMessage {
    /// Ask `target` for its view of the channel `before -> target` when
    /// forwarding on to `after`.
    ChannelInfoRequest {
        before: WalletAddress,
        target: WalletAddress,
        after: WalletAddress,
    },
    ChannelInfoResponse {
        channel: Option<DynamicChannelInformation>,
    },
}

type ChannelKey = (WalletAddress, WalletAddress);

fn channel_key(a: &WalletAddress, b: &WalletAddress) -> ChannelKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Every peer and channel of the simulated network.
#[derive(Debug, Default)]
pub struct GlobalView {
    peers: DashMap<WalletAddress, Peer>,
    channels: DashMap<ChannelKey, StaticChannelInformation>,
}

impl GlobalView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_peer(&self, peer: Peer) {
        self.peers.insert(peer.wallet_address.clone(), peer);
    }

    /// Insert a channel, replacing any channel between the same wallets.
    pub fn insert_channel(&self, channel: StaticChannelInformation) {
        let key = channel_key(&channel.from_wallet, &channel.to_wallet);
        self.channels.insert(key, channel);
    }

    pub fn remove_channel(
        &self,
        a: &WalletAddress,
        b: &WalletAddress,
    ) -> Option<StaticChannelInformation> {
        self.channels.remove(&channel_key(a, b)).map(|(_, c)| c)
    }

    pub fn peer(&self, wallet: &WalletAddress) -> Option<Peer> {
        self.peers.get(wallet).map(|p| p.value().clone())
    }

    pub fn channel_between(
        &self,
        a: &WalletAddress,
        b: &WalletAddress,
    ) -> Option<StaticChannelInformation> {
        self.channels.get(&channel_key(a, b)).map(|c| c.value().clone())
    }

    pub fn peers(&self) -> HashMap<WalletAddress, Peer> {
        self.peers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn channels(&self) -> Vec<StaticChannelInformation> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }

    /// Directed adjacency over `vertices`: both directions of every channel,
    /// weighted by the liquidity on the sending side.
    fn graph(&self, vertices: &BTreeSet<WalletAddress>) -> BTreeMap<WalletAddress, Vec<(WalletAddress, f64)>> {
        let mut graph: BTreeMap<WalletAddress, Vec<(WalletAddress, f64)>> = BTreeMap::new();
        for entry in self.channels.iter() {
            let c = entry.value();
            if !vertices.contains(&c.from_wallet) || !vertices.contains(&c.to_wallet) {
                continue;
            }
            graph
                .entry(c.from_wallet.clone())
                .or_default()
                .push((c.to_wallet.clone(), c.from_liquidity));
            graph
                .entry(c.to_wallet.clone())
                .or_default()
                .push((c.from_wallet.clone(), c.to_liquidity));
        }
        for edges in graph.values_mut() {
            edges.sort_by(|a, b| a.0.cmp(&b.0));
        }
        graph
    }
}

/// A simple path: the vertex sequence and the weight of each edge.
#[derive(Debug, Clone)]
struct Path {
    vertices: Vec<WalletAddress>,
    weights: Vec<f64>,
}

/// All simple paths from `from` to `to` with at most `max_hops` edges,
/// shortest first.
fn simple_paths(
    graph: &BTreeMap<WalletAddress, Vec<(WalletAddress, f64)>>,
    from: &WalletAddress,
    to: &WalletAddress,
    max_hops: usize,
) -> Vec<Path> {
    fn walk(
        graph: &BTreeMap<WalletAddress, Vec<(WalletAddress, f64)>>,
        to: &WalletAddress,
        max_hops: usize,
        current: &mut Path,
        found: &mut Vec<Path>,
    ) {
        let Some(last) = current.vertices.last().cloned() else {
            return;
        };
        if &last == to {
            found.push(current.clone());
            return;
        }
        if current.weights.len() == max_hops {
            return;
        }
        for (next, weight) in graph.get(&last).into_iter().flatten() {
            if current.vertices.contains(next) {
                continue;
            }
            current.vertices.push(next.clone());
            current.weights.push(*weight);
            walk(graph, to, max_hops, current, found);
            current.vertices.pop();
            current.weights.pop();
        }
    }

    let mut found = Vec::new();
    if from == to {
        return found;
    }
    let mut current = Path {
        vertices: vec![from.clone()],
        weights: Vec::new(),
    };
    walk(graph, to, max_hops, &mut current, &mut found);
    found.sort_by_key(|p| p.weights.len());
    found
}

/// Router with access to the [`GlobalView`].
pub struct OmniscientRouter {
    base: RouterBase,
    view: Arc<GlobalView>,
    config: OmniscientConfig,
}

impl OmniscientRouter {
    /// Create the router and start answering channel probes. The setup's
    /// known peers and channels are published to the view.
    pub fn new(
        setup: RouterSetup,
        config: OmniscientConfig,
        view: Arc<GlobalView>,
    ) -> Result<Arc<Self>, RoutingError> {
        let base = RouterBase::new(&RouterSetup {
            known_peers: Vec::new(),
            known_channels: Vec::new(),
            ..setup.clone()
        })?;
        view.insert_peer(setup.me.clone());
        for peer in setup.known_peers {
            view.insert_peer(peer);
        }
        for channel in setup.known_channels {
            view.insert_channel(channel);
        }
        let router = Arc::new(Self { base, view, config });
        spawn_listener(&router, router.base.socket().as_ref());
        Ok(router)
    }

    pub fn view(&self) -> &Arc<GlobalView> {
        &self.view
    }

    fn me_wallet(&self) -> &WalletAddress {
        self.base.wallet()
    }

    /// Probe every intermediate hop of `path`. `None` if any probe fails.
    async fn to_route(&self, path: &Path) -> Option<Route> {
        let mut peers = BTreeMap::new();
        for wallet in &path.vertices {
            let peer = self.view.peer(wallet)?;
            peers.insert(wallet.clone(), peer);
        }

        let mut channels = Vec::with_capacity(path.weights.len());
        for window in path.vertices.windows(3) {
            let (before, target, after) = (&window[0], &window[1], &window[2]);
            let address = &peers.get(target)?.network_address;
            let probe = OmniscientMessage::ChannelInfoRequest {
                before: before.clone(),
                target: target.clone(),
                after: after.clone(),
            };
            match self.base.request(address, probe).await {
                Ok(OmniscientMessage::ChannelInfoResponse {
                    channel: Some(channel),
                }) => channels.push(channel),
                Ok(_) => {
                    tracing::warn!(me = %self.me_wallet(), %target, "hop did not disclose channel");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(me = %self.me_wallet(), %target, error = %e, "gathering route info failed");
                    return None;
                }
            }
        }

        let [.., last_from, last_to] = path.vertices.as_slice() else {
            return None;
        };
        let last_liquidity = *path.weights.last()?;
        channels.push(DynamicChannelInformation::new(
            last_from.clone(),
            last_to.clone(),
            last_liquidity,
            ChannelFee::ZERO,
        ));
        Some(Route::new(channels, peers))
    }

    fn check_own_channel(
        &self,
        channel: &StaticChannelInformation,
        peer: &Peer,
    ) -> Result<(), RoutingError> {
        let other = channel.other_wallet(self.me_wallet())?;
        if other != &peer.wallet_address {
            return Err(RoutingError::ChannelPeerMismatch {
                from: channel.from_wallet.clone(),
                to: channel.to_wallet.clone(),
                peer: peer.wallet_address.clone(),
            });
        }
        Ok(())
    }

    fn answer_probe(
        &self,
        before: &WalletAddress,
        target: &WalletAddress,
        after: &WalletAddress,
    ) -> Option<DynamicChannelInformation> {
        if target != self.me_wallet() {
            return None;
        }
        let channel = self.view.channel_between(before, target)?;
        let fee = self.base.strategy().fee_toward(after);
        let info = channel.to_dynamic(before, fee).ok()?;
        Some(self.base.strategy().disclose(info))
    }
}

#[async_trait]
impl Router for OmniscientRouter {
    fn me(&self) -> &Peer {
        self.base.me()
    }

    fn known_peers(&self) -> HashMap<WalletAddress, Peer> {
        self.view.peers()
    }

    fn known_channels(&self) -> Vec<StaticChannelInformation> {
        self.view.channels()
    }

    async fn find_peer(&self, target: &WalletAddress) -> Result<Peer, RoutingError> {
        self.view
            .peer(target)
            .ok_or_else(|| RoutingError::PeerNotFound(target.clone()))
    }

    async fn find_route(&self, hops: &[WalletAddress]) -> Result<Route, RoutingError> {
        let target = hops
            .last()
            .ok_or_else(|| RoutingError::InvalidOperation("empty hop sequence".into()))?;
        let no_route = || RoutingError::NoRoute {
            from: self.me_wallet().clone(),
            to: target.clone(),
        };
        let mut vertices: BTreeSet<WalletAddress> = hops.iter().cloned().collect();
        vertices.insert(self.me_wallet().clone());

        let graph = self.view.graph(&vertices);
        let path = simple_paths(&graph, self.me_wallet(), target, hops.len())
            .into_iter()
            .find(|p| p.vertices[1..] == *hops)
            .ok_or_else(no_route)?;
        self.to_route(&path).await.ok_or_else(no_route)
    }

    async fn find_routes(&self, target: &WalletAddress) -> Result<Vec<Route>, RoutingError> {
        let vertices: BTreeSet<WalletAddress> = self.view.peers().into_keys().collect();
        let graph = self.view.graph(&vertices);
        let paths = simple_paths(&graph, self.me_wallet(), target, self.config.max_hops);
        tracing::debug!(me = %self.me_wallet(), %target, candidates = paths.len(), "enumerated paths");

        let mut routes = Vec::new();
        for path in &paths {
            if routes.len() >= self.config.max_routes {
                break;
            }
            if let Some(route) = self.to_route(path).await {
                routes.push(route);
            }
        }
        Ok(routes)
    }

    async fn cycle(&self, cycle: u64) -> Result<(), RoutingError> {
        self.base.advance(cycle);
        Ok(())
    }

    async fn add_or_update_channel(
        &self,
        channel: StaticChannelInformation,
        peer: Peer,
    ) -> Result<(), RoutingError> {
        self.check_own_channel(&channel, &peer)?;
        self.view.insert_peer(peer);
        self.view.insert_channel(channel);
        Ok(())
    }

    async fn remove_channel(&self, peer: &WalletAddress) -> Result<(), RoutingError> {
        if peer == self.me_wallet() {
            return Err(RoutingError::InvalidOperation(format!(
                "cannot remove channel to itself ({peer})"
            )));
        }
        // Both endpoints report the closing; the second finds it gone.
        if self.view.remove_channel(self.me_wallet(), peer).is_none() {
            tracing::debug!(me = %self.me_wallet(), %peer, "channel already absent from view");
        }
        Ok(())
    }

    fn report(&self, _topic: &str, _target: &WalletAddress, _successful: bool) {}
}

#[async_trait]
impl PacketHandler for OmniscientRouter {
    async fn handle_packet(&self, packet: Packet<RoutingMessage>) {
        let message = match OmniscientMessage::try_from(packet.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(me = %self.me_wallet(), error = %e, "ignoring packet");
                return;
            }
        };
        if let OmniscientMessage::ChannelInfoRequest {
            before,
            target,
            after,
        } = message
        {
            let channel = self.answer_probe(&before, &target, &after);
            let reply = OmniscientMessage::ChannelInfoResponse { channel };
            if let Err(e) = self.base.respond(&packet.sender, packet.id, reply).await {
                tracing::debug!(me = %self.me_wallet(), error = %e, "probe answer not delivered");
            }
        }
    }
}
