//! The router contract and the plumbing shared by the protocol routers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use pcn_core::{Algorithm, Peer, StaticChannelInformation, WalletAddress};
use pcn_network::{Packet, Socket};
use tokio::task::JoinHandle;

use crate::address_tree::AddressTreeRouter;
use crate::base::{Neighbor, RouterBase, RouterSetup};
use crate::error::RoutingError;
use crate::height::HeightRouter;
use crate::omniscient::{GlobalView, OmniscientRouter};
use crate::protocol::RoutingMessage;
use crate::route::Route;
use crate::trust::TrustRouter;

/// Route discovery and topology bookkeeping for one node.
///
/// `find_routes` never surfaces transport failures: unreachable peers and
/// timeouts only shrink the returned set. An `Err` means a protocol
/// invariant was violated.
#[async_trait]
pub trait Router: Send + Sync {
    /// The node this router belongs to.
    fn me(&self) -> &Peer;

    /// All peers the router currently knows about.
    fn known_peers(&self) -> HashMap<WalletAddress, Peer>;

    /// All channels the router currently knows about, without duplicates.
    fn known_channels(&self) -> Vec<StaticChannelInformation>;

    /// Resolve the full peer information of `target`.
    async fn find_peer(&self, target: &WalletAddress) -> Result<Peer, RoutingError>;

    /// Verify a predefined route. `hops` excludes this node and ends at the
    /// target.
    async fn find_route(&self, hops: &[WalletAddress]) -> Result<Route, RoutingError>;

    /// Some viable routes to `target`; neither best nor complete.
    async fn find_routes(&self, target: &WalletAddress) -> Result<Vec<Route>, RoutingError>;

    /// Enter cycle `cycle` and run periodic maintenance.
    async fn cycle(&self, cycle: u64) -> Result<(), RoutingError>;

    /// Add a new own channel or update an existing one.
    async fn add_or_update_channel(
        &self,
        channel: StaticChannelInformation,
        peer: Peer,
    ) -> Result<(), RoutingError>;

    /// Remove the own channel to `peer`.
    async fn remove_channel(&self, peer: &WalletAddress) -> Result<(), RoutingError>;

    /// Feedback about a non-routing interaction with `target`.
    fn report(&self, topic: &str, target: &WalletAddress, successful: bool);
}

/// A router built on [`RouterBase`]. Implementors supply route discovery
/// and react to topology and time; the [`Router`] contract follows.
#[async_trait]
pub trait ProtocolRouter: Send + Sync {
    fn base(&self) -> &RouterBase;

    /// Algorithm-specific route discovery.
    async fn discover(&self, target: &WalletAddress) -> Result<Vec<Route>, RoutingError>;

    async fn on_cycle(&self) -> Result<(), RoutingError> {
        Ok(())
    }

    async fn on_channel_updated(
        &self,
        _neighbor: &Neighbor,
        _is_new: bool,
    ) -> Result<(), RoutingError> {
        Ok(())
    }

    async fn on_channel_removed(&self, _neighbor: &Neighbor) -> Result<(), RoutingError> {
        Ok(())
    }

    fn on_report(&self, _topic: &str, _target: &WalletAddress, _successful: bool) {}
}

#[async_trait]
impl<T: ProtocolRouter> Router for T {
    fn me(&self) -> &Peer {
        self.base().me()
    }

    fn known_peers(&self) -> HashMap<WalletAddress, Peer> {
        self.base().known_peers()
    }

    fn known_channels(&self) -> Vec<StaticChannelInformation> {
        self.base().known_channels()
    }

    async fn find_peer(&self, target: &WalletAddress) -> Result<Peer, RoutingError> {
        if let Some(peer) = self.base().lookup_peer(target) {
            return Ok(peer);
        }
        tracing::warn!(me = %self.base().wallet(), %target, "peer not known, discovering routes");
        // Route discovery caches every peer on the returned routes.
        self.discover(target).await?;
        self.base()
            .lookup_peer(target)
            .ok_or_else(|| RoutingError::PeerNotFound(target.clone()))
    }

    async fn find_route(&self, hops: &[WalletAddress]) -> Result<Route, RoutingError> {
        let target = hops
            .last()
            .ok_or_else(|| RoutingError::InvalidOperation("empty hop sequence".into()))?;
        self.discover(target)
            .await?
            .into_iter()
            .find(|route| route.vertices() == hops)
            .ok_or_else(|| RoutingError::NoRoute {
                from: self.base().wallet().clone(),
                to: target.clone(),
            })
    }

    async fn find_routes(&self, target: &WalletAddress) -> Result<Vec<Route>, RoutingError> {
        self.discover(target).await
    }

    async fn cycle(&self, cycle: u64) -> Result<(), RoutingError> {
        self.base().advance(cycle);
        self.on_cycle().await
    }

    async fn add_or_update_channel(
        &self,
        channel: StaticChannelInformation,
        peer: Peer,
    ) -> Result<(), RoutingError> {
        let wallet = peer.wallet_address.clone();
        let is_new = self.base().upsert_neighbor(channel, peer)?;
        let neighbor = self
            .base()
            .neighbor(&wallet)
            .ok_or_else(|| RoutingError::PeerNotFound(wallet.clone()))?;
        tracing::debug!(me = %self.base().wallet(), neighbor = %wallet, is_new, "channel updated");
        self.on_channel_updated(&neighbor, is_new).await
    }

    async fn remove_channel(&self, peer: &WalletAddress) -> Result<(), RoutingError> {
        let neighbor = self.base().remove_neighbor(peer)?;
        tracing::debug!(me = %self.base().wallet(), neighbor = %peer, "channel removed");
        self.on_channel_removed(&neighbor).await
    }

    fn report(&self, topic: &str, target: &WalletAddress, successful: bool) {
        self.on_report(topic, target, successful);
    }
}

/// Consumer of inbound (non-response) routing packets.
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    async fn handle_packet(&self, packet: Packet<RoutingMessage>);
}

/// Drain `socket`'s inbound packets into `handler`, one task per packet so
/// that a node can answer while one of its own requests is outstanding.
///
/// The loop holds only a weak reference and stops once the handler is
/// dropped or the socket closes. Must be called inside a tokio runtime.
pub fn spawn_listener<H: PacketHandler>(
    handler: &Arc<H>,
    socket: &dyn Socket<RoutingMessage>,
) -> Option<JoinHandle<()>> {
    let mut inbox = socket.take_receiver()?;
    let weak: Weak<H> = Arc::downgrade(handler);
    let address = socket.address().clone();
    Some(tokio::spawn(async move {
        while let Some(packet) = inbox.recv().await {
            let Some(handler) = weak.upgrade() else {
                break;
            };
            tokio::spawn(async move { handler.handle_packet(packet).await });
        }
        tracing::debug!(%address, "routing listener stopped");
    }))
}

/// Create the router selected by `setup.config.algorithm`. The omniscient
/// router shares `view`; the others ignore it.
pub fn build_router(
    setup: RouterSetup,
    view: &Arc<GlobalView>,
) -> Result<Arc<dyn Router>, RoutingError> {
    let router: Arc<dyn Router> = match setup.config.algorithm.clone() {
        Algorithm::Omniscient(config) => OmniscientRouter::new(setup, config, Arc::clone(view))?,
        Algorithm::Trust(config) => TrustRouter::new(setup, config)?,
        Algorithm::AddressTree(config) => AddressTreeRouter::new(setup, config)?,
        Algorithm::Height(config) => HeightRouter::new(setup, config)?,
    };
    Ok(router)
}
