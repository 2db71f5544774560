//! Height-based, loop-free reactive routing.
//!
//! For every destination it has been asked about, a node keeps a height and
//! the heights of its neighbors; links point from higher to lower heights,
//! which makes the per-destination graph acyclic. Queries build the heights
//! on demand, updates propagate them together with annotated routes and
//! clears erase heights after a partition is detected. Route requests then
//! descend along downstream links.

mod destination;
mod node_height;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use pcn_core::{ChannelFee, HeightConfig, WalletAddress};
use pcn_network::Packet;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use destination::{Context, Destination, Outbound};
pub use node_height::{Height, LinkStatus, NeighborLink};

use crate::base::{Neighbor, RouterBase, RouterSetup};
use crate::error::RoutingError;
use crate::protocol::RoutingMessage;
use crate::route::Route;
use crate::router::{spawn_listener, PacketHandler, ProtocolRouter};
use crate::scoring::RouteChoiceWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeightMessage {
    Query {
        destination: WalletAddress,
        ttl: i64,
    },
    Update {
        destination: WalletAddress,
        sender_height: Height,
        routes: Vec<Route>,
        ttl: i64,
    },
    Clear {
        destination: WalletAddress,
        reference_level: Height,
        ttl: i64,
    },
    FindRoutesRequest {
        target: WalletAddress,
        ttl: i64,
    },
    FindRoutesResponse {
        routes: Vec<Route>,
        failed: bool,
    },
}

#[derive(Default)]
struct HeightState {
    destinations: HashMap<WalletAddress, Destination>,
    /// Wakes a route search waiting for the first downstream link.
    awaiting: HashMap<WalletAddress, Arc<Notify>>,
    /// Packets caused by channel changes, sent on the next cycle.
    deferred: Vec<Outbound>,
}

/// Height-based router of one node.
pub struct HeightRouter {
    base: RouterBase,
    config: HeightConfig,
    weights: RouteChoiceWeights,
    state: Mutex<HeightState>,
}

impl HeightRouter {
    pub fn new(setup: RouterSetup, config: HeightConfig) -> Result<Arc<Self>, RoutingError> {
        let router = Arc::new(Self {
            base: RouterBase::new(&setup)?,
            config,
            weights: RouteChoiceWeights::default(),
            state: Mutex::new(HeightState::default()),
        });
        spawn_listener(&router, router.base.socket().as_ref());
        Ok(router)
    }

    /// Neighbors currently downstream toward `destination`.
    pub fn downstream_links(&self, destination: &WalletAddress) -> Vec<WalletAddress> {
        self.state
            .lock()
            .destinations
            .get(destination)
            .map(Destination::downstream_links)
            .unwrap_or_default()
    }

    /// Our height toward `destination`, if we track it.
    pub fn height(&self, destination: &WalletAddress) -> Option<Height> {
        self.state
            .lock()
            .destinations
            .get(destination)
            .map(|d| d.height.clone())
    }

    fn neighbor_map(&self) -> BTreeMap<WalletAddress, Neighbor> {
        self.base
            .neighbors()
            .into_iter()
            .map(|n| (n.wallet().clone(), n))
            .collect()
    }

    /// Run `f` on the state of `destination`, creating it on first use.
    fn with_destination<R>(
        &self,
        destination: &WalletAddress,
        f: impl FnOnce(&mut Destination, &Context<'_>) -> R,
    ) -> R {
        let neighbors = self.neighbor_map();
        let ctx = Context {
            me: self.base.me(),
            cycle: self.base.cycle(),
            strategy: self.base.strategy(),
            neighbors: &neighbors,
            ttl: self.config.ttl,
        };
        let mut state = self.state.lock();
        let dest = state
            .destinations
            .entry(destination.clone())
            .or_insert_with(|| Destination::new(destination.clone(), &ctx));
        f(dest, &ctx)
    }

    /// Apply `f` to every tracked destination and defer the packets.
    fn defer_for_all(&self, f: impl Fn(&mut Destination, &Context<'_>) -> Vec<Outbound>) {
        let neighbors = self.neighbor_map();
        let ctx = Context {
            me: self.base.me(),
            cycle: self.base.cycle(),
            strategy: self.base.strategy(),
            neighbors: &neighbors,
            ttl: self.config.ttl,
        };
        let mut state = self.state.lock();
        let state = &mut *state;
        for dest in state.destinations.values_mut() {
            state.deferred.extend(f(dest, &ctx));
        }
    }

    async fn send(&self, packets: Vec<Outbound>) {
        let sends = packets.into_iter().filter_map(|packet| {
            let Some(neighbor) = self.base.neighbor(&packet.to) else {
                tracing::debug!(me = %self.base.wallet(), to = %packet.to, "dropping packet for a former neighbor");
                return None;
            };
            Some(async move {
                let result = self.base.notify(neighbor.address(), packet.message).await;
                (neighbor, result)
            })
        });
        for (neighbor, result) in join_all(sends).await {
            if let Err(e) = result {
                tracing::warn!(me = %self.base.wallet(), to = %neighbor.wallet(), error = %e, "height packet not delivered");
            }
        }
    }

    /// Pick the downstream neighbor toward `destination`, querying the
    /// network first if no link is directed yet.
    async fn downstream_link(&self, destination: &WalletAddress, ttl: i64) -> Option<WalletAddress> {
        let query = self.with_destination(destination, |dest, _| {
            (dest.all_undirected() && !dest.route_required).then(|| dest.query_all(ttl))
        });
        if let Some(packets) = query {
            let notify = Arc::clone(
                self.state
                    .lock()
                    .awaiting
                    .entry(destination.clone())
                    .or_insert_with(|| Arc::new(Notify::new())),
            );
            self.send(packets).await;
            if tokio::time::timeout(self.base.request_timeout(), notify.notified())
                .await
                .is_err()
            {
                tracing::debug!(me = %self.base.wallet(), %destination, "no update before timeout");
            }
            self.state.lock().awaiting.remove(destination);
        }

        let next = self
            .state
            .lock()
            .destinations
            .get(destination)
            .and_then(|d| d.best_next_hop(&self.weights));
        if next.is_none() {
            tracing::warn!(me = %self.base.wallet(), %destination, "no downstream link");
        }
        next
    }

    /// Routes to `target`; `None` if the search failed on the way.
    async fn find_routes(
        &self,
        target: &WalletAddress,
        ttl: i64,
        last: Option<&Neighbor>,
    ) -> Option<Vec<Route>> {
        let me = self.base.me();
        if target == &me.wallet_address {
            let Some(last) = last else {
                return Some(Vec::new());
            };
            let hop = self.base.strategy().disclose(last.inbound(ChannelFee::ZERO));
            return Some(vec![Route::single_hop(hop, me.clone())]);
        }
        if ttl <= 0 {
            tracing::warn!(me = %me.wallet_address, %target, "ttl used up for route request");
            return None;
        }

        let next_hop = self.downstream_link(target, ttl).await?;
        let next = self.base.neighbor(&next_hop)?;
        let request = HeightMessage::FindRoutesRequest {
            target: target.clone(),
            ttl: ttl - 1,
        };
        let mut routes = match self.base.request(next.address(), request).await {
            Ok(HeightMessage::FindRoutesResponse { routes, failed: false }) => routes,
            Ok(HeightMessage::FindRoutesResponse { failed: true, .. }) => return None,
            Ok(other) => {
                tracing::warn!(me = %me.wallet_address, ?other, "unexpected reply to route request");
                return None;
            }
            Err(e) => {
                tracing::warn!(me = %me.wallet_address, next = %next.wallet(), error = %e, "sending route request failed");
                return None;
            }
        };

        if let Some(last) = last {
            let strategy = self.base.strategy();
            let hop = strategy.disclose(last.inbound(strategy.fee_toward(next.wallet())));
            for route in &mut routes {
                route.prepend(hop.clone(), me.clone());
            }
        }
        self.base
            .cache_peers(routes.iter().flat_map(|r| r.peers.values().cloned()));
        Some(routes)
    }
}

#[async_trait]
impl ProtocolRouter for HeightRouter {
    fn base(&self) -> &RouterBase {
        &self.base
    }

    async fn discover(&self, target: &WalletAddress) -> Result<Vec<Route>, RoutingError> {
        Ok(self
            .find_routes(target, self.config.ttl, None)
            .await
            .unwrap_or_default())
    }

    async fn on_cycle(&self) -> Result<(), RoutingError> {
        let deferred = std::mem::take(&mut self.state.lock().deferred);
        self.send(deferred).await;
        Ok(())
    }

    async fn on_channel_updated(&self, neighbor: &Neighbor, _is_new: bool) -> Result<(), RoutingError> {
        self.defer_for_all(|dest, ctx| dest.link_up(neighbor, ctx));
        Ok(())
    }

    async fn on_channel_removed(&self, neighbor: &Neighbor) -> Result<(), RoutingError> {
        self.defer_for_all(|dest, ctx| dest.link_down(neighbor.wallet(), ctx));
        Ok(())
    }
}

#[async_trait]
impl PacketHandler for HeightRouter {
    async fn handle_packet(&self, packet: Packet<RoutingMessage>) {
        let message = match HeightMessage::try_from(packet.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(me = %self.base.wallet(), error = %e, "ignoring packet");
                return;
            }
        };
        let me = self.base.wallet();
        match message {
            HeightMessage::Query { destination, ttl } => {
                if &destination == me {
                    return;
                }
                let Some(sender) = self.base.neighbor_at(&packet.sender) else {
                    tracing::debug!(%me, sender = %packet.sender, "query from a non-neighbor");
                    return;
                };
                let out = self.with_destination(&destination, |dest, ctx| {
                    dest.on_query(sender.wallet(), ttl, ctx)
                });
                self.send(out).await;
            }
            HeightMessage::Update {
                destination,
                sender_height,
                routes,
                ttl,
            } => {
                if &destination == me || !self.base.is_neighbor(&sender_height.id) {
                    return;
                }
                self.base
                    .cache_peers(routes.iter().flat_map(|r| r.peers.values().cloned()));
                let (out, satisfied) = self.with_destination(&destination, |dest, ctx| {
                    dest.on_update(sender_height, routes, ttl, ctx)
                });
                if satisfied {
                    if let Some(notify) = self.state.lock().awaiting.get(&destination) {
                        notify.notify_one();
                    }
                }
                self.send(out).await;
            }
            HeightMessage::Clear {
                destination,
                reference_level,
                ttl,
            } => {
                if &destination == me {
                    return;
                }
                let out = self.with_destination(&destination, |dest, ctx| {
                    dest.on_clear(&reference_level, ttl, ctx)
                });
                self.send(out).await;
            }
            HeightMessage::FindRoutesRequest { target, ttl } => {
                let routes = match self.base.neighbor_at(&packet.sender) {
                    Some(last) => self.find_routes(&target, ttl, Some(&last)).await,
                    None => {
                        tracing::warn!(%me, sender = %packet.sender, "route request from a non-neighbor");
                        None
                    }
                };
                let reply = HeightMessage::FindRoutesResponse {
                    failed: routes.is_none(),
                    routes: routes.unwrap_or_default(),
                };
                if let Err(e) = self.base.respond(&packet.sender, packet.id, reply).await {
                    tracing::debug!(%me, error = %e, "reply not delivered");
                }
            }
            HeightMessage::FindRoutesResponse { .. } => {}
        }
    }
}
