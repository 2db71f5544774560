//! Routes and cheapest-route selection.

use std::collections::BTreeMap;

use pcn_core::{ChannelFee, DynamicChannelInformation, Peer, WalletAddress};
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

/// An ordered chain of directional channel snapshots plus the peers on it.
///
/// Hop `i`'s `to_wallet` is hop `i + 1`'s `from_wallet`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Route {
    pub channels: Vec<DynamicChannelInformation>,
    pub peers: BTreeMap<WalletAddress, Peer>,
}

impl Route {
    pub fn new(
        channels: Vec<DynamicChannelInformation>,
        peers: BTreeMap<WalletAddress, Peer>,
    ) -> Self {
        Self { channels, peers }
    }

    /// A route consisting of a single channel toward `peer`.
    pub fn single_hop(channel: DynamicChannelInformation, peer: Peer) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(peer.wallet_address.clone(), peer);
        Self {
            channels: vec![channel],
            peers,
        }
    }

    pub fn hop_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The wallets reached by each hop, i.e. the path without its origin.
    pub fn vertices(&self) -> Vec<WalletAddress> {
        self.channels.iter().map(|c| c.to_wallet.clone()).collect()
    }

    pub fn first_hop(&self) -> Option<&DynamicChannelInformation> {
        self.channels.first()
    }

    pub fn destination(&self) -> Option<&WalletAddress> {
        self.channels.last().map(|c| &c.to_wallet)
    }

    /// Smallest liquidity along the route; `0.0` for an empty route.
    pub fn bottleneck_liquidity(&self) -> f64 {
        self.channels
            .iter()
            .map(|c| c.liquidity)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Fee the sender pays on top of the amount. The last hop is never
    /// charged, so it is left out of the fold.
    pub fn composed_fee(&self) -> ChannelFee {
        match self.channels.split_last() {
            Some((_, charged)) => ChannelFee::compose(charged.iter().map(|c| &c.fee)),
            None => ChannelFee::ZERO,
        }
    }

    /// True if any hop connects `a` and `b`, in either direction.
    pub fn contains_pair(&self, a: &WalletAddress, b: &WalletAddress) -> bool {
        self.channels.iter().any(|c| {
            (&c.from_wallet == a && &c.to_wallet == b) || (&c.from_wallet == b && &c.to_wallet == a)
        })
    }

    pub fn peer(&self, wallet: &WalletAddress) -> Option<&Peer> {
        self.peers.get(wallet)
    }

    /// Extend the route by one hop in front of it, originating at `me`.
    pub fn prepend(&mut self, channel: DynamicChannelInformation, me: Peer) {
        self.channels.insert(0, channel);
        self.peers.insert(me.wallet_address.clone(), me);
    }

    /// The peer one hop past the first hop, if the route is that long.
    pub fn after_next_hop(&self) -> Option<&Peer> {
        self.channels
            .get(1)
            .and_then(|c| self.peers.get(&c.to_wallet))
    }
}

/// Outcome of choosing among candidate routes for a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSelection {
    /// The chosen route (selection is always a singleton).
    pub routes: Vec<Route>,
    /// Bottleneck liquidity of the chosen route.
    pub max_flow: f64,
    /// Total fees on top of the requested amount.
    pub overall_fees: f64,
}

/// Pick the route with the lowest total cost that can carry `amount` plus
/// all fees through every hop.
pub fn select_cheapest_route(
    routes: &[Route],
    amount: f64,
) -> Result<RouteSelection, RoutingError> {
    let mut viable: Vec<(f64, &Route)> = routes
        .iter()
        .filter(|route| !route.is_empty())
        .map(|route| (route.composed_fee().add_to_payment(amount), route))
        .filter(|(total, route)| *total <= route.bottleneck_liquidity())
        .collect();
    viable.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (total, route) = viable
        .into_iter()
        .next()
        .ok_or(RoutingError::InsufficientLiquidity { amount })?;

    tracing::debug!(
        hops = route.hop_count(),
        total,
        amount,
        "selected cheapest route"
    );
    Ok(RouteSelection {
        max_flow: route.bottleneck_liquidity(),
        overall_fees: total - amount,
        routes: vec![route.clone()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(s: &str) -> WalletAddress {
        WalletAddress::new(s)
    }

    fn hop(from: &str, to: &str, liquidity: f64, rate: f64, fixed: f64) -> DynamicChannelInformation {
        DynamicChannelInformation::new(w(from), w(to), liquidity, ChannelFee { rate, fixed })
    }

    fn route(hops: Vec<DynamicChannelInformation>) -> Route {
        Route::new(hops, BTreeMap::new())
    }

    #[test]
    fn test_route_helpers() {
        let r = route(vec![
            hop("a", "b", 10.0, 1.0, 0.0),
            hop("b", "c", 4.0, 1.0, 0.0),
            hop("c", "d", 7.0, 1.0, 0.0),
        ]);
        assert_eq!(r.hop_count(), 3);
        assert_eq!(r.vertices(), vec![w("b"), w("c"), w("d")]);
        assert_eq!(r.bottleneck_liquidity(), 4.0);
        assert!(r.contains_pair(&w("c"), &w("b")));
        assert!(!r.contains_pair(&w("a"), &w("d")));
        assert_eq!(r.destination(), Some(&w("d")));
    }

    #[test]
    fn test_composed_fee_skips_last_hop() {
        let r = route(vec![
            hop("a", "b", 10.0, 1.0, 0.0),
            hop("b", "c", 10.0, 1.0, 1.0),
            hop("c", "d", 10.0, 2.0, 5.0),
        ]);
        let fee = r.composed_fee();
        assert!((fee.add_to_payment(10.0) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_routes_is_an_error() {
        let err = select_cheapest_route(&[], 5.0).unwrap_err();
        assert!(matches!(err, RoutingError::InsufficientLiquidity { .. }));
    }

    #[test]
    fn test_liquidity_below_amount_is_rejected() {
        let r = route(vec![hop("a", "b", 4.0, 1.0, 0.0), hop("b", "c", 3.0, 1.0, 0.0)]);
        assert!(select_cheapest_route(&[r], 5.0).is_err());
    }

    #[test]
    fn test_fees_count_against_liquidity() {
        let r = route(vec![hop("a", "b", 6.0, 1.0, 2.0), hop("b", "c", 6.0, 1.0, 0.0)]);
        assert!(select_cheapest_route(&[r], 5.0).is_err());
    }

    #[test]
    fn test_cheapest_of_three() {
        let routes = vec![
            route(vec![hop("a", "b", 20.0, 1.1, 0.0), hop("b", "z", 20.0, 1.0, 0.0)]),
            route(vec![hop("a", "c", 20.0, 1.0, 0.5), hop("c", "z", 20.0, 1.0, 0.0)]),
            route(vec![hop("a", "d", 10.0, 1.01, 0.1), hop("d", "z", 30.0, 1.0, 0.0)]),
        ];
        let selection = select_cheapest_route(&routes, 5.0).unwrap();
        assert_eq!(selection.routes, vec![routes[2].clone()]);
        assert_eq!(selection.max_flow, 10.0);
        assert!((selection.overall_fees - 0.15).abs() < 1e-9);
    }
}
