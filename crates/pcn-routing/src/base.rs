//! Bookkeeping shared by the reactive routers: the neighbor table, the
//! bounded peer and channel caches, the cycle counter and typed access to
//! the socket.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pcn_core::{
    ChannelFee, DynamicChannelInformation, NetworkAddress, Peer, RouterConfig,
    StaticChannelInformation, Strategy, WalletAddress,
};
use pcn_network::{NetworkError, PacketId, Socket};

use crate::error::RoutingError;
use crate::protocol::RoutingMessage;

/// Everything a router needs at construction.
#[derive(Clone)]
pub struct RouterSetup {
    pub me: Peer,
    pub socket: Arc<dyn Socket<RoutingMessage>>,
    pub strategy: Strategy,
    pub config: RouterConfig,
    /// Peers known before the simulation starts.
    pub known_peers: Vec<Peer>,
    /// Channels known before the simulation starts, own channels included.
    pub known_channels: Vec<StaticChannelInformation>,
}

impl RouterSetup {
    pub fn new(me: Peer, socket: Arc<dyn Socket<RoutingMessage>>) -> Self {
        Self {
            me,
            socket,
            strategy: Strategy::default(),
            config: RouterConfig::default(),
            known_peers: Vec::new(),
            known_channels: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_known(
        mut self,
        peers: impl IntoIterator<Item = Peer>,
        channels: impl IntoIterator<Item = StaticChannelInformation>,
    ) -> Self {
        self.known_peers.extend(peers);
        self.known_channels.extend(channels);
        self
    }
}

/// A node this router shares a channel with.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub peer: Peer,
    pub channel: StaticChannelInformation,
    own_wallet: WalletAddress,
    own_liquidity: f64,
    neighbor_liquidity: f64,
}

impl Neighbor {
    /// Fails if `peer` is not an endpoint of `channel`.
    pub fn new(peer: Peer, channel: StaticChannelInformation) -> Result<Self, RoutingError> {
        let neighbor_liquidity = channel.liquidity(&peer.wallet_address)?;
        let own_wallet = channel.other_wallet(&peer.wallet_address)?.clone();
        let own_liquidity = channel.liquidity(&own_wallet)?;
        Ok(Self {
            peer,
            channel,
            own_wallet,
            own_liquidity,
            neighbor_liquidity,
        })
    }

    pub fn wallet(&self) -> &WalletAddress {
        &self.peer.wallet_address
    }

    pub fn address(&self) -> &NetworkAddress {
        &self.peer.network_address
    }

    pub fn own_liquidity(&self) -> f64 {
        self.own_liquidity
    }

    pub fn neighbor_liquidity(&self) -> f64 {
        self.neighbor_liquidity
    }

    /// The channel as a hop from the neighbor toward us.
    pub fn inbound(&self, fee: ChannelFee) -> DynamicChannelInformation {
        DynamicChannelInformation::new(
            self.peer.wallet_address.clone(),
            self.own_wallet.clone(),
            self.neighbor_liquidity,
            fee,
        )
    }

    /// The channel as a hop from us toward the neighbor.
    pub fn outbound(&self, fee: ChannelFee) -> DynamicChannelInformation {
        DynamicChannelInformation::new(
            self.own_wallet.clone(),
            self.peer.wallet_address.clone(),
            self.own_liquidity,
            fee,
        )
    }
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    last_access: u64,
    /// Monotonic touch counter, breaks ties between equal cycles.
    stamp: u64,
}

#[derive(Debug, Default)]
struct BookState {
    cycle: u64,
    neighbors: BTreeMap<WalletAddress, Neighbor>,
    peer_cache: HashMap<WalletAddress, Cached<Peer>>,
    channel_cache: Vec<Cached<StaticChannelInformation>>,
    next_stamp: u64,
}

impl BookState {
    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn cache_peer(&mut self, peer: Peer, capacity: usize) {
        let stamp = self.stamp();
        let last_access = self.cycle;
        self.peer_cache.insert(
            peer.wallet_address.clone(),
            Cached {
                value: peer,
                last_access,
                stamp,
            },
        );
        if self.peer_cache.len() > capacity {
            let oldest = self
                .peer_cache
                .iter()
                .min_by_key(|(_, c)| (c.last_access, c.stamp))
                .map(|(w, _)| w.clone());
            if let Some(wallet) = oldest {
                tracing::trace!(%wallet, "evicting cached peer");
                self.peer_cache.remove(&wallet);
            }
        }
    }

    fn cache_channel(&mut self, me: &WalletAddress, channel: StaticChannelInformation, capacity: usize) {
        if channel.has_wallet(me) {
            return;
        }
        let stamp = self.stamp();
        let cycle = self.cycle;
        match self
            .channel_cache
            .iter_mut()
            .find(|c| c.value.has_wallets(&channel.from_wallet, &channel.to_wallet))
        {
            Some(entry) => {
                entry.last_access = cycle;
                entry.stamp = stamp;
            }
            None => self.channel_cache.push(Cached {
                value: channel,
                last_access: cycle,
                stamp,
            }),
        }
        if self.channel_cache.len() > capacity {
            let oldest = self
                .channel_cache
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| (c.last_access, c.stamp))
                .map(|(i, _)| i);
            if let Some(index) = oldest {
                self.channel_cache.remove(index);
            }
        }
    }
}

/// Shared state of one node's router.
pub struct RouterBase {
    me: Peer,
    strategy: Strategy,
    socket: Arc<dyn Socket<RoutingMessage>>,
    cache_size: usize,
    cache_expiry: Option<u64>,
    request_timeout: Duration,
    state: Mutex<BookState>,
}

impl RouterBase {
    /// Seed the neighbor table and caches from the setup. Own channels
    /// become neighbors; their peer must be among the known peers.
    pub fn new(setup: &RouterSetup) -> Result<Self, RoutingError> {
        setup.config.validate()?;
        let base = Self {
            me: setup.me.clone(),
            strategy: setup.strategy.clone(),
            socket: Arc::clone(&setup.socket),
            cache_size: setup.config.cache_size,
            cache_expiry: setup.config.cache_expiry,
            request_timeout: setup.config.request_timeout(),
            state: Mutex::new(BookState::default()),
        };

        let peers: HashMap<&WalletAddress, &Peer> = setup
            .known_peers
            .iter()
            .map(|p| (&p.wallet_address, p))
            .collect();
        base.cache_peers(setup.known_peers.iter().cloned());

        for channel in &setup.known_channels {
            if channel.has_wallet(base.wallet()) {
                let other = channel.other_wallet(base.wallet())?;
                let peer = peers
                    .get(other)
                    .ok_or_else(|| RoutingError::PeerNotFound(other.clone()))?;
                base.upsert_neighbor(channel.clone(), (*peer).clone())?;
            } else {
                base.cache_channel(channel.clone());
            }
        }
        Ok(base)
    }

    pub fn me(&self) -> &Peer {
        &self.me
    }

    pub fn wallet(&self) -> &WalletAddress {
        &self.me.wallet_address
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn socket(&self) -> &Arc<dyn Socket<RoutingMessage>> {
        &self.socket
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn cycle(&self) -> u64 {
        self.state.lock().cycle
    }

    // ---- neighbors ----

    pub fn neighbors(&self) -> Vec<Neighbor> {
        self.state.lock().neighbors.values().cloned().collect()
    }

    pub fn neighbor(&self, wallet: &WalletAddress) -> Option<Neighbor> {
        self.state.lock().neighbors.get(wallet).cloned()
    }

    pub fn is_neighbor(&self, wallet: &WalletAddress) -> bool {
        self.state.lock().neighbors.contains_key(wallet)
    }

    /// The neighbor currently reachable at `address`.
    pub fn neighbor_at(&self, address: &NetworkAddress) -> Option<Neighbor> {
        self.state
            .lock()
            .neighbors
            .values()
            .find(|n| n.address() == address)
            .cloned()
    }

    /// Insert or refresh the neighbor behind `channel`. Returns true for a
    /// new neighbor.
    pub fn upsert_neighbor(
        &self,
        channel: StaticChannelInformation,
        peer: Peer,
    ) -> Result<bool, RoutingError> {
        let other = channel.other_wallet(self.wallet())?;
        if other != &peer.wallet_address {
            return Err(RoutingError::ChannelPeerMismatch {
                from: channel.from_wallet.clone(),
                to: channel.to_wallet.clone(),
                peer: peer.wallet_address.clone(),
            });
        }
        let neighbor = Neighbor::new(peer.clone(), channel)?;

        let mut state = self.state.lock();
        let is_new = !state.neighbors.contains_key(neighbor.wallet());
        if is_new {
            let (from, to) = (&neighbor.channel.from_wallet, &neighbor.channel.to_wallet);
            state.channel_cache.retain(|c| !c.value.has_wallets(from, to));
        }
        state.neighbors.insert(neighbor.wallet().clone(), neighbor);
        state.cache_peer(peer, self.cache_size);
        Ok(is_new)
    }

    /// Drop the neighbor `wallet`, returning its last entry.
    pub fn remove_neighbor(&self, wallet: &WalletAddress) -> Result<Neighbor, RoutingError> {
        if wallet == self.wallet() {
            return Err(RoutingError::InvalidOperation(format!(
                "cannot remove channel to itself ({wallet})"
            )));
        }
        self.state.lock().neighbors.remove(wallet).ok_or_else(|| {
            RoutingError::InvalidOperation(format!(
                "cannot remove channel from {} to {wallet}: no such channel",
                self.wallet()
            ))
        })
    }

    // ---- caches ----

    pub fn cache_peer(&self, peer: Peer) {
        self.state.lock().cache_peer(peer, self.cache_size);
    }

    pub fn cache_peers(&self, peers: impl IntoIterator<Item = Peer>) {
        let mut state = self.state.lock();
        for peer in peers {
            state.cache_peer(peer, self.cache_size);
        }
    }

    /// Remember a channel between two other nodes. Own channels are ignored.
    pub fn cache_channel(&self, channel: StaticChannelInformation) {
        let me = self.wallet().clone();
        self.state
            .lock()
            .cache_channel(&me, channel, self.cache_size);
    }

    /// Look a peer up in the cache or neighbor table. A hit counts as an
    /// access.
    pub fn lookup_peer(&self, wallet: &WalletAddress) -> Option<Peer> {
        let mut state = self.state.lock();
        let peer = match state.peer_cache.get(wallet) {
            Some(cached) => cached.value.clone(),
            None => state.neighbors.get(wallet)?.peer.clone(),
        };
        state.cache_peer(peer.clone(), self.cache_size);
        Some(peer)
    }

    pub fn known_peers(&self) -> HashMap<WalletAddress, Peer> {
        let state = self.state.lock();
        let mut peers: HashMap<WalletAddress, Peer> = state
            .peer_cache
            .iter()
            .map(|(w, c)| (w.clone(), c.value.clone()))
            .collect();
        for (wallet, neighbor) in &state.neighbors {
            peers.insert(wallet.clone(), neighbor.peer.clone());
        }
        peers
    }

    pub fn known_channels(&self) -> Vec<StaticChannelInformation> {
        let state = self.state.lock();
        state
            .channel_cache
            .iter()
            .map(|c| c.value.clone())
            .chain(state.neighbors.values().map(|n| n.channel.clone()))
            .collect()
    }

    pub fn cached_peer_count(&self) -> usize {
        self.state.lock().peer_cache.len()
    }

    pub fn cached_channel_count(&self) -> usize {
        self.state.lock().channel_cache.len()
    }

    /// Move to cycle `cycle` and expire stale cache entries.
    pub fn advance(&self, cycle: u64) {
        let mut state = self.state.lock();
        state.cycle = cycle;
        if let Some(expiry) = self.cache_expiry {
            let keep = |c: u64| c.saturating_add(expiry) >= cycle;
            state.peer_cache.retain(|_, c| keep(c.last_access));
            state.channel_cache.retain(|c| keep(c.last_access));
        }
    }

    // ---- transport ----

    /// Round trip with the peer at `to`, typed to one message family.
    pub async fn request<M>(&self, to: &NetworkAddress, message: M) -> Result<M, RoutingError>
    where
        M: Into<RoutingMessage> + TryFrom<RoutingMessage, Error = NetworkError> + Send,
    {
        let reply = self
            .socket
            .request(to, message.into(), self.request_timeout)
            .await?;
        Ok(M::try_from(reply)?)
    }

    pub async fn notify<M>(&self, to: &NetworkAddress, message: M) -> Result<(), RoutingError>
    where
        M: Into<RoutingMessage> + Send,
    {
        self.socket.notify(to, message.into()).await?;
        Ok(())
    }

    pub async fn respond<M>(
        &self,
        to: &NetworkAddress,
        request_id: PacketId,
        message: M,
    ) -> Result<(), RoutingError>
    where
        M: Into<RoutingMessage> + Send,
    {
        self.socket.respond(to, request_id, message.into()).await?;
        Ok(())
    }
}
