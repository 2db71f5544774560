//! Integration test: bounded peer and channel caches of the shared router
//! bookkeeping.

use pcn_core::RouterConfig;
use pcn_integration_tests::{channel, peer, setup, w};
use pcn_network::{NetworkConfig, SimNetwork};
use pcn_routing::{RouterBase, RoutingMessage};

fn base(cache_size: usize, cache_expiry: Option<u64>) -> RouterBase {
    let network = SimNetwork::<RoutingMessage>::new(NetworkConfig::default());
    let config = RouterConfig {
        cache_size,
        cache_expiry,
        ..RouterConfig::default()
    };
    RouterBase::new(&setup(&network, "me", &[], config)).unwrap()
}

#[tokio::test]
async fn test_peer_cache_evicts_least_recently_accessed() {
    let base = base(3, None);
    for (cycle, name) in ["p1", "p2", "p3"].iter().enumerate() {
        base.advance(cycle as u64);
        base.cache_peer(peer(name));
    }
    base.advance(5);
    assert!(base.lookup_peer(&w("p1")).is_some(), "touch p1");

    base.cache_peer(peer("p4"));
    assert_eq!(base.cached_peer_count(), 3);
    assert!(base.lookup_peer(&w("p2")).is_none(), "p2 had the oldest access");
    for name in ["p1", "p3", "p4"] {
        assert!(base.known_peers().contains_key(&w(name)), "{name} kept");
    }
}

#[tokio::test]
async fn test_channel_cache_evicts_least_recently_accessed() {
    let base = base(2, None);
    base.cache_channel(channel("x", "y", 1.0));
    base.advance(1);
    base.cache_channel(channel("y", "z", 1.0));
    base.advance(2);
    base.cache_channel(channel("z", "q", 1.0));

    assert_eq!(base.cached_channel_count(), 2);
    let known = base.known_channels();
    assert!(!known.iter().any(|c| c.has_wallets(&w("x"), &w("y"))));
}

#[tokio::test]
async fn test_cache_expiry_by_age() {
    let base = base(10, Some(2));
    base.cache_peer(peer("old"));
    base.advance(1);
    base.cache_peer(peer("fresh"));
    base.advance(3);
    assert!(base.lookup_peer(&w("old")).is_none());
    assert!(base.lookup_peer(&w("fresh")).is_some());
}

#[tokio::test]
async fn test_neighbors_are_not_cached_twice() {
    let network = SimNetwork::<RoutingMessage>::new(NetworkConfig::default());
    let channels = [channel("me", "n", 5.0), channel("n", "x", 5.0)];
    let s = setup(&network, "me", &channels, RouterConfig::default()).with_known(
        vec![peer("x")],
        vec![channels[1].clone()],
    );
    let base = RouterBase::new(&s).unwrap();
    assert_eq!(base.known_channels().len(), 2);
    assert_eq!(base.cached_channel_count(), 1, "only n - x is cached");
    assert!(base.is_neighbor(&w("n")));
}
