//! Trust-aware reactive routing.
//!
//! Route requests are flooded hop by hop within a radius. Every node keeps
//! a routing table of next hops learned from passing requests and replies
//! and picks among alternatives with the composite routing function
//! ([`CompositeWeights`]), in which the trust level of the next hop is one
//! of the terms. Trust comes from `report` feedback (direct) and from the
//! opinion of the node after the next hop (indirect).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pcn_core::{ChannelFee, Peer, TrustConfig, WalletAddress};
use pcn_network::Packet;
use serde::{Deserialize, Serialize};

use crate::base::{Neighbor, RouterBase, RouterSetup};
use crate::error::RoutingError;
use crate::protocol::RoutingMessage;
use crate::route::Route;
use crate::router::{spawn_listener, PacketHandler, ProtocolRouter};
use crate::scoring::{CompositeWeights, ReportTally, TrustBlend, TrustLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub broadcast_id: u64,
    pub source: WalletAddress,
    pub source_seq: u64,
    pub destination: WalletAddress,
    pub destination_seq: u64,
    pub hop_count: u32,
    pub ttl: i64,
    /// Composed fee of the reverse path back to the source.
    pub fee: ChannelFee,
    /// Bottleneck liquidity of the reverse path back to the source.
    pub max_flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub source: WalletAddress,
    pub source_seq: u64,
    pub destination: WalletAddress,
    pub destination_seq: u64,
    pub hop_count: u32,
    pub fee: ChannelFee,
    pub max_flow: f64,
    pub route: Route,
    pub failed: bool,
}

impl RouteResponse {
    fn failure(request: &RouteRequest, me: &Peer) -> Self {
        let mut route = Route::default();
        route.peers.insert(me.wallet_address.clone(), me.clone());
        Self {
            source: request.source.clone(),
            source_seq: request.source_seq,
            destination: request.destination.clone(),
            destination_seq: request.destination_seq,
            hop_count: 0,
            fee: ChannelFee::ZERO,
            max_flow: 0.0,
            route,
            failed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrustMessage {
    RouteRequest(RouteRequest),
    RouteResponse(RouteResponse),
    TrustRequest { target: WalletAddress },
    TrustResponse { trust: f64 },
}

#[derive(Debug, Clone, PartialEq)]
struct TableEntry {
    destination_seq: u64,
    next_hop: WalletAddress,
    hop_count: u32,
    expires_at: u64,
    fee: ChannelFee,
    max_flow: f64,
}

#[derive(Debug, Default)]
struct TrustState {
    last_seq: u64,
    last_broadcast_id: u64,
    table: HashMap<WalletAddress, TableEntry>,
    /// Requests already handled, keyed by (source, broadcast id).
    seen: HashSet<(WalletAddress, u64)>,
    /// Requests already answered as destination, per inbound neighbor.
    answered: HashSet<(WalletAddress, u64, WalletAddress)>,
    reports: HashMap<WalletAddress, ReportTally>,
}

impl TrustState {
    fn direct_trust(&self, wallet: &WalletAddress) -> f64 {
        self.reports
            .get(wallet)
            .map(ReportTally::ratio)
            .unwrap_or(0.5)
    }
}

/// Trust-aware reactive router.
pub struct TrustRouter {
    base: RouterBase,
    config: TrustConfig,
    weights: CompositeWeights,
    blend: TrustBlend,
    state: Mutex<TrustState>,
}

impl TrustRouter {
    pub fn new(setup: RouterSetup, config: TrustConfig) -> Result<Arc<Self>, RoutingError> {
        let router = Arc::new(Self {
            base: RouterBase::new(&setup)?,
            config,
            weights: CompositeWeights::default(),
            blend: TrustBlend::default(),
            state: Mutex::new(TrustState::default()),
        });
        spawn_listener(&router, router.base.socket().as_ref());
        Ok(router)
    }

    /// Share of successful reports about `wallet`; 0.5 without evidence.
    pub fn direct_trust(&self, wallet: &WalletAddress) -> f64 {
        self.state.lock().direct_trust(wallet)
    }

    /// Next hop currently stored for `destination`.
    pub fn next_hop(&self, destination: &WalletAddress) -> Option<WalletAddress> {
        self.state
            .lock()
            .table
            .get(destination)
            .map(|e| e.next_hop.clone())
    }

    async fn indirect_trust(&self, next_hop: &WalletAddress, after_next: &Peer) -> f64 {
        let request = TrustMessage::TrustRequest {
            target: next_hop.clone(),
        };
        let opinion = match self.base.request(&after_next.network_address, request).await {
            Ok(TrustMessage::TrustResponse { trust }) => trust.clamp(0.0, 1.0),
            Ok(_) => 0.5,
            Err(e) => {
                tracing::debug!(me = %self.base.wallet(), peer = %after_next.wallet_address, error = %e, "trust request failed");
                0.5
            }
        };
        opinion * self.direct_trust(&after_next.wallet_address)
    }

    async fn trust_level(&self, next_hop: &WalletAddress, after_next: Option<&Peer>) -> TrustLevel {
        let direct = self.direct_trust(next_hop);
        let indirect = match after_next {
            Some(peer) => self.indirect_trust(next_hop, peer).await,
            None => 0.5,
        };
        self.blend.level(direct, indirect)
    }

    async fn crf(&self, next_hop: &WalletAddress, reply: &RouteResponse) -> f64 {
        let level = self.trust_level(next_hop, reply.route.after_next_hop()).await;
        self.weights
            .cost(level, reply.max_flow, &reply.fee, reply.hop_count)
    }

    /// Insert or refresh the table entry for `destination`. On equal
    /// sequence numbers the entry with the lower CRF wins; trust is judged
    /// without an indirect opinion here.
    fn learn(
        &self,
        destination: &WalletAddress,
        destination_seq: u64,
        next_hop: &WalletAddress,
        hop_count: u32,
        fee: ChannelFee,
        max_flow: f64,
    ) {
        if destination == self.base.wallet() {
            return;
        }
        let expires_at = self.base.cycle() + self.config.route_lifetime;
        let candidate = TableEntry {
            destination_seq,
            next_hop: next_hop.clone(),
            hop_count,
            expires_at,
            fee,
            max_flow,
        };
        let mut state = self.state.lock();
        let replace = match state.table.get(destination) {
            None => true,
            Some(entry) if entry.destination_seq < destination_seq => true,
            Some(entry) if entry.destination_seq == destination_seq => {
                let cost = |e: &TableEntry| {
                    let level = self.blend.level(state.direct_trust(&e.next_hop), 0.5);
                    self.weights.cost(level, e.max_flow, &e.fee, e.hop_count)
                };
                cost(&candidate) <= cost(entry)
            }
            Some(_) => false,
        };
        if replace {
            state.table.insert(destination.clone(), candidate);
        }
    }

    /// Forward `request` to `next` and extend its reply by the hop from
    /// `last_hop` to this node.
    async fn forward(
        &self,
        request: &RouteRequest,
        destination_seq: u64,
        last_hop: Option<&Neighbor>,
        next: &Neighbor,
    ) -> RouteResponse {
        let strategy = self.base.strategy();
        let toward_source = last_hop
            .map(|l| strategy.fee_toward(l.wallet()))
            .unwrap_or(ChannelFee::ZERO);
        let reverse_hop = strategy.disclose(next.inbound(toward_source));
        let forwarded = RouteRequest {
            destination_seq,
            hop_count: request.hop_count + 1,
            ttl: request.ttl - 1,
            fee: request.fee.add(&reverse_hop.fee),
            max_flow: request.max_flow.min(reverse_hop.liquidity),
            ..request.clone()
        };

        let reply = match self
            .base
            .request(next.address(), TrustMessage::RouteRequest(forwarded.clone()))
            .await
        {
            Ok(TrustMessage::RouteResponse(reply)) => reply,
            Ok(other) => {
                tracing::warn!(me = %self.base.wallet(), next = %next.wallet(), ?other, "unexpected reply to route request");
                return RouteResponse::failure(&forwarded, self.base.me());
            }
            Err(e) => {
                tracing::warn!(me = %self.base.wallet(), next = %next.wallet(), error = %e, "sending route request failed");
                return RouteResponse::failure(&forwarded, self.base.me());
            }
        };

        if reply.failed {
            return reply;
        }
        self.learn(
            &reply.destination,
            reply.destination_seq,
            next.wallet(),
            reply.hop_count,
            reply.fee,
            reply.max_flow,
        );
        self.base.cache_peers(reply.route.peers.values().cloned());

        let Some(last) = last_hop else {
            return reply;
        };
        let hop = strategy.disclose(last.inbound(strategy.fee_toward(next.wallet())));
        let mut route = reply.route;
        let fee = reply.fee.add(&hop.fee);
        let max_flow = reply.max_flow.min(hop.liquidity);
        route.prepend(hop, self.base.me().clone());
        RouteResponse {
            hop_count: reply.hop_count + 1,
            fee,
            max_flow,
            route,
            ..reply
        }
    }

    async fn process(&self, request: RouteRequest, last_hop: Option<Neighbor>) -> RouteResponse {
        let me = self.base.me();
        if let Some(last) = &last_hop {
            if last.neighbor_liquidity() <= 0.0 {
                tracing::warn!(me = %me.wallet_address, from = %last.wallet(), "inbound channel has no liquidity");
                return RouteResponse::failure(&request, me);
            }
            let at_destination = request.destination == me.wallet_address;
            let fresh = {
                let mut state = self.state.lock();
                if at_destination {
                    state.answered.insert((
                        request.source.clone(),
                        request.broadcast_id,
                        last.wallet().clone(),
                    ))
                } else {
                    state
                        .seen
                        .insert((request.source.clone(), request.broadcast_id))
                }
            };
            if !fresh {
                tracing::debug!(me = %me.wallet_address, source = %request.source, id = request.broadcast_id, "route request already received");
                return RouteResponse::failure(&request, me);
            }

            // Reverse route toward the source.
            self.learn(
                &request.source,
                request.source_seq,
                last.wallet(),
                request.hop_count,
                request.fee,
                request.max_flow,
            );

            if at_destination {
                let hop = self.base.strategy().disclose(last.inbound(ChannelFee::ZERO));
                let destination_seq = {
                    let mut state = self.state.lock();
                    state.last_seq += 1;
                    state.last_seq
                };
                return RouteResponse {
                    source: request.source,
                    source_seq: request.source_seq,
                    destination: me.wallet_address.clone(),
                    destination_seq,
                    hop_count: 1,
                    fee: hop.fee,
                    max_flow: hop.liquidity,
                    route: Route::single_hop(hop, me.clone()),
                    failed: false,
                };
            }

            if request.ttl <= 0 {
                return RouteResponse::failure(&request, me);
            }
        }

        // A fresh table entry is used directly when its next hop is trusted
        // or is the destination itself.
        let entry = self
            .state
            .lock()
            .table
            .get(&request.destination)
            .filter(|e| e.destination_seq >= request.destination_seq)
            .cloned();
        let mut table_reply: Option<(WalletAddress, RouteResponse)> = None;
        if let Some(entry) = entry {
            if let Some(next) = self.base.neighbor(&entry.next_hop) {
                let reply = self
                    .forward(&request, entry.destination_seq, last_hop.as_ref(), &next)
                    .await;
                if !reply.failed {
                    let level = self
                        .trust_level(next.wallet(), reply.route.after_next_hop())
                        .await;
                    if level == TrustLevel::Trusted || &request.destination == next.wallet() {
                        return reply;
                    }
                }
                table_reply = Some((entry.next_hop, reply));
            }
        }

        let mut best = RouteResponse::failure(&request, me);
        let mut best_crf = f64::MAX;
        for next in self.base.neighbors() {
            if last_hop.as_ref().map(Neighbor::wallet) == Some(next.wallet()) {
                continue;
            }
            let reply = match table_reply.take() {
                Some((hop, reply)) if &hop == next.wallet() => reply,
                other => {
                    table_reply = other;
                    self.forward(&request, request.destination_seq, last_hop.as_ref(), &next)
                        .await
                }
            };
            if reply.failed {
                continue;
            }
            let crf = self.crf(next.wallet(), &reply).await;
            if crf < best_crf {
                best = reply;
                best_crf = crf;
            }
        }
        best
    }
}

#[async_trait]
impl ProtocolRouter for TrustRouter {
    fn base(&self) -> &RouterBase {
        &self.base
    }

    async fn discover(&self, target: &WalletAddress) -> Result<Vec<Route>, RoutingError> {
        if target == self.base.wallet() {
            return Ok(Vec::new());
        }
        let request = {
            let mut state = self.state.lock();
            state.last_broadcast_id += 1;
            state.last_seq += 1;
            let request = RouteRequest {
                broadcast_id: state.last_broadcast_id,
                source: self.base.wallet().clone(),
                source_seq: state.last_seq,
                destination: target.clone(),
                destination_seq: 0,
                hop_count: 0,
                ttl: i64::from(self.config.radius) + 1,
                fee: ChannelFee::ZERO,
                max_flow: f64::MAX,
            };
            state
                .seen
                .insert((request.source.clone(), request.broadcast_id));
            request
        };
        let reply = self.process(request, None).await;
        if reply.failed {
            tracing::debug!(me = %self.base.wallet(), %target, "no route found");
            return Ok(Vec::new());
        }
        Ok(vec![reply.route])
    }

    async fn on_cycle(&self) -> Result<(), RoutingError> {
        let cycle = self.base.cycle();
        let mut state = self.state.lock();
        state.table.retain(|_, e| e.expires_at > cycle);
        state.seen.clear();
        state.answered.clear();
        if state
            .table
            .values()
            .any(|e| !self.base.is_neighbor(&e.next_hop))
        {
            tracing::warn!(me = %self.base.wallet(), "routing table is not in sync with the channels");
        }
        Ok(())
    }

    async fn on_channel_removed(&self, neighbor: &Neighbor) -> Result<(), RoutingError> {
        self.state
            .lock()
            .table
            .retain(|_, e| &e.next_hop != neighbor.wallet());
        Ok(())
    }

    fn on_report(&self, topic: &str, target: &WalletAddress, successful: bool) {
        tracing::debug!(me = %self.base.wallet(), topic, %target, successful, "interaction reported");
        self.state
            .lock()
            .reports
            .entry(target.clone())
            .or_default()
            .record(successful);
    }
}

#[async_trait]
impl PacketHandler for TrustRouter {
    async fn handle_packet(&self, packet: Packet<RoutingMessage>) {
        let message = match TrustMessage::try_from(packet.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(me = %self.base.wallet(), error = %e, "ignoring packet");
                return;
            }
        };
        let reply = match message {
            TrustMessage::RouteRequest(request) => match self.base.neighbor_at(&packet.sender) {
                Some(last_hop) => {
                    TrustMessage::RouteResponse(self.process(request, Some(last_hop)).await)
                }
                None => {
                    tracing::warn!(me = %self.base.wallet(), sender = %packet.sender, "route request from a non-neighbor");
                    TrustMessage::RouteResponse(RouteResponse::failure(&request, self.base.me()))
                }
            },
            TrustMessage::TrustRequest { target } => TrustMessage::TrustResponse {
                trust: self.direct_trust(&target),
            },
            TrustMessage::RouteResponse(_) | TrustMessage::TrustResponse { .. } => return,
        };
        if let Err(e) = self.base.respond(&packet.sender, packet.id, reply).await {
            tracing::debug!(me = %self.base.wallet(), error = %e, "reply not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::tests::{channel, peer};
    use crate::router::Router;
    use pcn_core::StaticChannelInformation;
    use pcn_network::{NetworkConfig, SimNetwork};

    fn w(s: &str) -> WalletAddress {
        WalletAddress::new(s)
    }

    fn build(names: &[&str], channels: Vec<StaticChannelInformation>) -> Vec<Arc<TrustRouter>> {
        let net = SimNetwork::<RoutingMessage>::new(NetworkConfig::default());
        names
            .iter()
            .map(|name| {
                let me = peer(name);
                let socket = net.connect(me.network_address.clone()).unwrap();
                let own: Vec<StaticChannelInformation> = channels
                    .iter()
                    .filter(|c| c.has_wallet(&me.wallet_address))
                    .cloned()
                    .collect();
                let neighbors: Vec<Peer> = own
                    .iter()
                    .filter_map(|c| c.other_wallet(&me.wallet_address).ok())
                    .map(|w| peer(w.as_str()))
                    .collect();
                let setup = RouterSetup::new(me, Arc::new(socket)).with_known(neighbors, own);
                TrustRouter::new(setup, TrustConfig::default()).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_failure_response_carries_only_self() {
        let request = RouteRequest {
            broadcast_id: 1,
            source: w("a"),
            source_seq: 1,
            destination: w("d"),
            destination_seq: 0,
            hop_count: 0,
            ttl: 3,
            fee: ChannelFee::ZERO,
            max_flow: f64::MAX,
        };
        let response = RouteResponse::failure(&request, &peer("b"));
        assert!(response.failed);
        assert!(response.route.is_empty());
        assert!(response.route.peers.contains_key(&w("b")));
    }

    #[tokio::test]
    async fn test_direct_trust_from_reports() {
        let routers = build(&["a", "b"], vec![channel("a", 5.0, "b", 5.0)]);
        let a = &routers[0];
        assert_eq!(a.direct_trust(&w("b")), 0.5);
        for i in 0..10 {
            a.report("payment", &w("b"), i < 2);
        }
        assert!((a.direct_trust(&w("b")) - 0.2).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finds_route_over_line() {
        let routers = build(
            &["a", "b", "c"],
            vec![channel("a", 5.0, "b", 5.0), channel("b", 4.0, "c", 4.0)],
        );
        let routes = routers[0].find_routes(&w("c")).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].vertices(), vec![w("b"), w("c")]);
        assert_eq!(routes[0].bottleneck_liquidity(), 4.0);
        assert_eq!(routers[0].next_hop(&w("c")), Some(w("b")));
        // The intermediate node learned the reverse route to the source.
        assert_eq!(routers[1].next_hop(&w("a")), Some(w("a")));
        // Discovery also resolves the peer.
        assert_eq!(routers[0].find_peer(&w("c")).await.unwrap().name, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_yields_no_routes() {
        let routers = build(&["a", "b"], vec![channel("a", 5.0, "b", 5.0)]);
        assert!(routers[0].find_routes(&w("z")).await.unwrap().is_empty());
        assert!(matches!(
            routers[0].find_peer(&w("z")).await,
            Err(RoutingError::PeerNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_and_follow_channel_removal() {
        let routers = build(
            &["a", "b", "c"],
            vec![channel("a", 5.0, "b", 5.0), channel("b", 4.0, "c", 4.0)],
        );
        routers[0].find_routes(&w("c")).await.unwrap();
        assert!(routers[0].next_hop(&w("c")).is_some());

        routers[0].remove_channel(&w("b")).await.unwrap();
        assert!(routers[0].next_hop(&w("c")).is_none());

        let lifetime = TrustConfig::default().route_lifetime;
        assert_eq!(routers[1].next_hop(&w("c")), Some(w("c")));
        routers[1].cycle(lifetime).await.unwrap();
        assert!(routers[1].next_hop(&w("c")).is_none());
    }
}
