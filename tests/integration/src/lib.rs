//! Fixtures shared by the cross-crate routing tests.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use pcn_core::{NetworkAddress, Peer, PublicKey, RouterConfig, StaticChannelInformation, WalletAddress};
use pcn_network::SimNetwork;
use pcn_routing::{Router, RouterSetup, RoutingMessage};

pub fn w(name: &str) -> WalletAddress {
    WalletAddress::new(name)
}

pub fn peer(name: &str) -> Peer {
    Peer::new(
        name,
        PublicKey::from_bytes(name.as_bytes().to_vec()),
        w(name),
        NetworkAddress::new(format!("sim://{name}")),
    )
}

pub fn channel(a: &str, b: &str, liquidity: f64) -> StaticChannelInformation {
    StaticChannelInformation::new(w(a), liquidity, w(b), liquidity)
}

/// Setup for `name` that starts with its own channels out of `channels`
/// and knows the peers on their other end.
pub fn setup(
    network: &Arc<SimNetwork<RoutingMessage>>,
    name: &str,
    channels: &[StaticChannelInformation],
    config: RouterConfig,
) -> RouterSetup {
    let me = peer(name);
    let socket = network
        .connect(me.network_address.clone())
        .expect("fresh address");
    let own: Vec<StaticChannelInformation> = channels
        .iter()
        .filter(|c| c.has_wallet(&me.wallet_address))
        .cloned()
        .collect();
    let neighbors: Vec<Peer> = own
        .iter()
        .filter_map(|c| c.other_wallet(&me.wallet_address).ok())
        .map(|other| peer(other.as_str()))
        .collect();
    RouterSetup::new(me, Arc::new(socket))
        .with_config(config)
        .with_known(neighbors, own)
}

/// Cycle every router once per cycle, giving traffic `settle` in between.
pub async fn run_cycles<R: Router + ?Sized>(routers: &[Arc<R>], cycles: Range<u64>, settle: Duration) {
    for cycle in cycles {
        for router in routers {
            router.cycle(cycle).await.expect("cycle");
        }
        tokio::time::sleep(settle).await;
    }
}
