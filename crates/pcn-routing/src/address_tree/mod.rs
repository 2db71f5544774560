//! Distributed address-tree routing with a DHT for address lookup.
//!
//! Every node derives a transient routing address from its neighbors'
//! advertised tables so that the address space forms a binary tree that
//! follows the topology. Routes are found by greedy descent toward the
//! target's address; the address itself is looked up in a DHT whose
//! anchors are derived from wallet hashes.

mod address;
mod table;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use pcn_core::{AddressTreeConfig, ChannelFee, Peer, WalletAddress};
use pcn_network::Packet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use address::{address_mask, anchor_address, format_address, level_sibling, SubtreeId};
pub use table::{AddressTable, DhtStep, NeighborUpdate, TableEntry, UpdateEntry};

use crate::base::{Neighbor, RouterBase, RouterSetup};
use crate::error::RoutingError;
use crate::protocol::RoutingMessage;
use crate::route::Route;
use crate::router::{spawn_listener, PacketHandler, ProtocolRouter};

/// A wallet's routing address and peer as stored at its DHT anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhtRecord {
    pub address: u32,
    pub peer: Peer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AddressTreeMessage {
    FindRouteRequest {
        destination: u32,
        ttl: i64,
        exclude: Vec<WalletAddress>,
    },
    FindRouteResponse {
        route: Option<Route>,
    },
    /// Lookup of `identifier`, or a store when `store` is set.
    DhtRequest {
        anchor: u32,
        identifier: WalletAddress,
        store: Option<DhtRecord>,
        ttl: i64,
    },
    DhtResponse {
        record: Option<DhtRecord>,
    },
    NeighborUpdate(NeighborUpdate),
}

#[derive(Debug, Clone)]
struct LookupEntry {
    record: DhtRecord,
    last_update: u64,
}

#[derive(Debug)]
struct TreeState {
    table: AddressTable,
    lookups: HashMap<WalletAddress, LookupEntry>,
    refresh_counter: u64,
}

/// Cycles of jitter before the first refresh, derived from the wallet so
/// that refreshes spread over the interval reproducibly.
fn initial_refresh_counter(wallet: &WalletAddress, interval: u64) -> u64 {
    let digest = Sha256::digest(wallet.as_str().as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let mut rng = StdRng::seed_from_u64(u64::from_be_bytes(seed));
    rng.gen_range(0..interval.max(1))
}

/// Address-tree router of one node.
pub struct AddressTreeRouter {
    base: RouterBase,
    config: AddressTreeConfig,
    ttl: i64,
    state: Mutex<TreeState>,
}

impl AddressTreeRouter {
    pub fn new(setup: RouterSetup, config: AddressTreeConfig) -> Result<Arc<Self>, RoutingError> {
        let base = RouterBase::new(&setup)?;
        let state = TreeState {
            table: AddressTable::new(base.wallet().clone(), config.addr_size),
            lookups: HashMap::new(),
            refresh_counter: initial_refresh_counter(base.wallet(), config.refresh_interval),
        };
        let router = Arc::new(Self {
            base,
            ttl: i64::from(config.ttl()),
            config,
            state: Mutex::new(state),
        });
        spawn_listener(&router, router.base.socket().as_ref());
        Ok(router)
    }

    /// Current routing address, `None` while the node has none.
    pub fn routing_address(&self) -> Option<u32> {
        self.state.lock().table.address()
    }

    fn max_age(&self) -> f64 {
        1.5 * self.config.refresh_interval as f64
    }

    async fn find_route(
        &self,
        destination: u32,
        ttl: i64,
        exclude: &[WalletAddress],
        last: Option<&Neighbor>,
    ) -> Option<Route> {
        let me = self.base.me();
        match last {
            Some(last) if self.routing_address() == Some(destination) => {
                let hop = self.base.strategy().disclose(last.inbound(ChannelFee::ZERO));
                return Some(Route::single_hop(hop, me.clone()));
            }
            _ => {}
        }
        if ttl <= 0 {
            tracing::warn!(me = %me.wallet_address, destination = %format_address(Some(destination), self.config.addr_size), "ttl used up for route request");
            return None;
        }

        let entry = self.state.lock().table.route_next_hop(destination, exclude)?;
        let Some(next) = self.base.neighbor(&entry.next_hop_wallet) else {
            tracing::warn!(me = %me.wallet_address, next = %entry.next_hop_wallet, "routing table points at a non-neighbor");
            return None;
        };
        let request = AddressTreeMessage::FindRouteRequest {
            destination,
            ttl: ttl - 1,
            exclude: exclude.to_vec(),
        };
        let mut route = match self.base.request(next.address(), request).await {
            Ok(AddressTreeMessage::FindRouteResponse { route }) => route?,
            Ok(other) => {
                tracing::warn!(me = %me.wallet_address, ?other, "unexpected reply to route request");
                return None;
            }
            Err(e) => {
                tracing::debug!(me = %me.wallet_address, next = %next.wallet(), error = %e, "sending route request failed");
                return None;
            }
        };
        self.base.cache_peers(route.peers.values().cloned());

        if let Some(last) = last {
            let strategy = self.base.strategy();
            let hop = strategy.disclose(last.inbound(strategy.fee_toward(next.wallet())));
            route.prepend(hop, me.clone());
        }
        Some(route)
    }

    /// Look up `identifier` at its anchor, or store `store` there.
    async fn request_dht(
        &self,
        anchor: u32,
        identifier: &WalletAddress,
        store: Option<DhtRecord>,
        ttl: i64,
    ) -> Option<DhtRecord> {
        let me = self.base.wallet();
        if let Some(record) = &store {
            self.base.cache_peer(record.peer.clone());
        } else if let Some(entry) = self.state.lock().lookups.get(identifier) {
            return Some(entry.record.clone());
        }
        if ttl <= 0 {
            tracing::warn!(%me, anchor = %format_address(Some(anchor), self.config.addr_size), "ttl used up for DHT request");
            return None;
        }

        let step = self
            .state
            .lock()
            .table
            .dht_step(anchor, self.config.gap_filling)?;
        let (anchor, entry) = match step {
            DhtStep::Anchor => {
                let cycle = self.base.cycle();
                let mut state = self.state.lock();
                if let Some(record) = store {
                    state.lookups.insert(
                        identifier.clone(),
                        LookupEntry {
                            record,
                            last_update: cycle,
                        },
                    );
                }
                return state.lookups.get(identifier).map(|e| e.record.clone());
            }
            DhtStep::Forward { anchor, entry } => (anchor, entry),
        };

        let next = self.base.neighbor(&entry.next_hop_wallet)?;
        let request = AddressTreeMessage::DhtRequest {
            anchor,
            identifier: identifier.clone(),
            store,
            ttl: ttl - 1,
        };
        match self.base.request(next.address(), request).await {
            Ok(AddressTreeMessage::DhtResponse { record }) => {
                if let Some(record) = &record {
                    self.base.cache_peer(record.peer.clone());
                }
                record
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(%me, next = %next.wallet(), error = %e, "DHT request failed");
                None
            }
        }
    }

    async fn broadcast_update(&self, update: NeighborUpdate) {
        let neighbors = self.base.neighbors();
        let sends = neighbors.iter().map(|n| {
            let message = AddressTreeMessage::NeighborUpdate(update.clone());
            async move { (n, self.base.notify(n.address(), message).await) }
        });
        for (neighbor, result) in join_all(sends).await {
            if let Err(e) = result {
                tracing::warn!(me = %self.base.wallet(), neighbor = %neighbor.wallet(), error = %e, "sending routing table failed");
            }
        }
    }

    async fn store_own_address(&self, address: u32) {
        let me = self.base.me();
        let anchor = anchor_address(&me.wallet_address, self.config.addr_size);
        let record = DhtRecord {
            address,
            peer: me.clone(),
        };
        if self
            .request_dht(anchor, &me.wallet_address, Some(record), self.ttl)
            .await
            .is_none()
        {
            tracing::warn!(me = %me.wallet_address, "storing the routing address in the DHT failed");
        }
    }
}

#[async_trait]
impl ProtocolRouter for AddressTreeRouter {
    fn base(&self) -> &RouterBase {
        &self.base
    }

    async fn discover(&self, target: &WalletAddress) -> Result<Vec<Route>, RoutingError> {
        let Some(own) = self.routing_address() else {
            tracing::warn!(me = %self.base.wallet(), "no routing address");
            return Ok(Vec::new());
        };

        let anchor = anchor_address(target, self.config.addr_size);
        let Some(record) = self.request_dht(anchor, target, None, self.ttl).await else {
            return Ok(Vec::new());
        };
        if record.address == own {
            tracing::warn!(me = %self.base.wallet(), %target, address = %format_address(Some(own), self.config.addr_size), "target shares our routing address");
            return Ok(Vec::new());
        }

        let mut routes: Vec<Route> = Vec::new();
        for _ in 0..self.ttl {
            let exclude: Vec<WalletAddress> = routes
                .iter()
                .flat_map(|r| r.peers.keys())
                .filter(|w| *w != target)
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let Some(route) = self.find_route(record.address, self.ttl, &exclude, None).await else {
                break;
            };
            if routes.contains(&route) {
                break;
            }
            routes.push(route);
        }
        Ok(routes)
    }

    async fn on_cycle(&self) -> Result<(), RoutingError> {
        let cycle = self.base.cycle();
        let max_age = self.max_age();
        let update = {
            let mut state = self.state.lock();
            state.table.expire_updates(cycle, max_age);
            state
                .lookups
                .retain(|_, e| e.last_update as f64 + max_age >= cycle as f64);
            state.table.rebuild(cycle);

            let mut update = None;
            if state.refresh_counter == 0 {
                state.refresh_counter = self.config.refresh_interval;
                if !state.table.validate() {
                    let selected = state.table.select(cycle);
                    tracing::debug!(me = %self.base.wallet(), address = %format_address(selected, self.config.addr_size), "selected routing address");
                }
                update = state.table.neighbor_update();
            }
            state.refresh_counter = state.refresh_counter.saturating_sub(1);
            update
        };

        if let Some(update) = update {
            let address = update.address;
            self.broadcast_update(update).await;
            self.store_own_address(address).await;
        }
        Ok(())
    }

    async fn on_channel_removed(&self, neighbor: &Neighbor) -> Result<(), RoutingError> {
        let cycle = self.base.cycle();
        let mut state = self.state.lock();
        state.table.remove_update(neighbor.wallet());
        state.table.rebuild(cycle);
        state.refresh_counter = 0;
        Ok(())
    }
}

#[async_trait]
impl PacketHandler for AddressTreeRouter {
    async fn handle_packet(&self, packet: Packet<RoutingMessage>) {
        let message = match AddressTreeMessage::try_from(packet.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(me = %self.base.wallet(), error = %e, "ignoring packet");
                return;
            }
        };
        let reply = match message {
            AddressTreeMessage::FindRouteRequest {
                destination,
                ttl,
                exclude,
            } => {
                let route = match self.base.neighbor_at(&packet.sender) {
                    Some(last) => self.find_route(destination, ttl, &exclude, Some(&last)).await,
                    None => {
                        tracing::warn!(me = %self.base.wallet(), sender = %packet.sender, "route request from a non-neighbor");
                        None
                    }
                };
                AddressTreeMessage::FindRouteResponse { route }
            }
            AddressTreeMessage::DhtRequest {
                anchor,
                identifier,
                store,
                ttl,
            } => AddressTreeMessage::DhtResponse {
                record: self.request_dht(anchor, &identifier, store, ttl).await,
            },
            AddressTreeMessage::NeighborUpdate(update) => {
                if !self.base.is_neighbor(&update.identifier) {
                    tracing::debug!(me = %self.base.wallet(), from = %update.identifier, "ignoring update from a non-neighbor");
                    return;
                }
                let cycle = self.base.cycle();
                let mut state = self.state.lock();
                state.table.store_update(update);
                state.table.rebuild(cycle);
                return;
            }
            AddressTreeMessage::FindRouteResponse { .. } | AddressTreeMessage::DhtResponse { .. } => {
                return
            }
        };
        if let Err(e) = self.base.respond(&packet.sender, packet.id, reply).await {
            tracing::debug!(me = %self.base.wallet(), error = %e, "reply not delivered");
        }
    }
}

impl fmt::Display for AddressTreeRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let me = self.base.me();
        let state = self.state.lock();
        writeln!(
            f,
            "{}: {}/{}/{} ({})",
            me.name,
            me.wallet_address,
            me.network_address,
            format_address(state.table.address(), state.table.addr_size()),
            state.table.update_count()
        )?;
        write!(f, "{}", state.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::tests::{channel, peer};
    use crate::router::Router;
    use pcn_core::{RouterConfig, StaticChannelInformation};
    use pcn_network::{NetworkConfig, SimNetwork};
    use std::time::Duration;

    fn w(s: &str) -> WalletAddress {
        WalletAddress::new(s)
    }

    fn config() -> AddressTreeConfig {
        AddressTreeConfig {
            addr_size: 4,
            refresh_interval: 2,
            ..AddressTreeConfig::default()
        }
    }

    fn build(names: &[&str], channels: Vec<StaticChannelInformation>) -> Vec<Arc<AddressTreeRouter>> {
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
                let setup = RouterSetup::new(me, Arc::new(socket))
                    .with_config(RouterConfig::default())
                    .with_known(neighbors, own);
                AddressTreeRouter::new(setup, config()).unwrap()
            })
            .collect()
    }

    async fn run_cycles(routers: &[Arc<AddressTreeRouter>], cycles: std::ops::Range<u64>) {
        for cycle in cycles {
            for router in routers {
                router.cycle(cycle).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_refresh_jitter_is_deterministic() {
        let a = initial_refresh_counter(&w("a"), 5);
        assert_eq!(a, initial_refresh_counter(&w("a"), 5));
        assert!(a < 5);
        assert_eq!(initial_refresh_counter(&w("a"), 0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_addressless_router_finds_nothing() {
        let routers = build(&["a", "b"], vec![channel("a", 5.0, "b", 5.0)]);
        assert_eq!(routers[0].routing_address(), None);
        assert!(routers[0].find_routes(&w("b")).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_converges_and_routes() {
        let routers = build(
            &["a", "b", "c"],
            vec![channel("a", 5.0, "b", 5.0), channel("b", 4.0, "c", 4.0)],
        );
        run_cycles(&routers, 0..12).await;

        let addresses: Vec<u32> = routers
            .iter()
            .map(|r| r.routing_address().expect("every node is addressed"))
            .collect();
        assert_ne!(addresses[0], addresses[1]);
        assert_ne!(addresses[1], addresses[2]);

        let routes = routers[0].find_routes(&w("c")).await.unwrap();
        assert!(!routes.is_empty(), "a reaches c:\n{}", routers[0]);
        assert_eq!(routes[0].vertices(), vec![w("b"), w("c")]);
        assert_eq!(routes[0].bottleneck_liquidity(), 4.0);
        assert_eq!(routers[0].find_peer(&w("c")).await.unwrap().name, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_channel_drops_update() {
        let routers = build(&["a", "b"], vec![channel("a", 5.0, "b", 5.0)]);
        run_cycles(&routers, 0..6).await;
        assert!(routers[0].to_string().contains("(1)"));

        routers[0].remove_channel(&w("b")).await.unwrap();
        assert!(routers[0].to_string().contains("(0)"));
        // Updates from a former neighbor are no longer accepted.
        run_cycles(&routers[1..], 6..8).await;
        assert!(routers[0].to_string().contains("(0)"));
    }
}
