//! Integration test: address assignment and routing of the address-tree
//! router on a small network.

use std::sync::Arc;
use std::time::Duration;

use pcn_core::{AddressTreeConfig, RouterConfig, StaticChannelInformation};
use pcn_integration_tests::{channel, run_cycles, setup, w};
use pcn_network::{NetworkConfig, SimNetwork};
use pcn_routing::{AddressTreeRouter, Router, RoutingMessage};

fn config() -> AddressTreeConfig {
    AddressTreeConfig {
        addr_size: 4,
        refresh_interval: 2,
        ..AddressTreeConfig::default()
    }
}

fn build(names: &[&str], channels: &[StaticChannelInformation]) -> Vec<Arc<AddressTreeRouter>> {
    let network = SimNetwork::<RoutingMessage>::new(NetworkConfig::default());
    names
        .iter()
        .map(|name| {
            AddressTreeRouter::new(setup(&network, name, channels, RouterConfig::default()), config())
                .unwrap()
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_addresses_converge_on_line() {
    let names = ["a", "b", "c", "d"];
    let channels = vec![
        channel("a", "b", 10.0),
        channel("b", "c", 10.0),
        channel("c", "d", 10.0),
    ];
    let routers = build(&names, &channels);
    run_cycles(&routers, 0..20, Duration::from_millis(10)).await;

    let addresses: Vec<u32> = routers
        .iter()
        .map(|r| r.routing_address().expect("every node is addressed"))
        .collect();
    for address in &addresses {
        assert!(*address < 16, "address {address} exceeds 4 bits");
    }
    for c in &channels {
        let i = names.iter().position(|n| w(n) == c.from_wallet).unwrap();
        let j = names.iter().position(|n| w(n) == c.to_wallet).unwrap();
        assert_ne!(
            addresses[i], addresses[j],
            "neighbors {} and {} share an address",
            names[i], names[j]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_routes_two_hops_after_convergence() {
    let routers = build(
        &["a", "b", "c"],
        &[channel("a", "b", 10.0), channel("b", "c", 6.0)],
    );
    run_cycles(&routers, 0..12, Duration::from_millis(10)).await;

    let routes = routers[0].find_routes(&w("c")).await.unwrap();
    assert!(!routes.is_empty(), "a reaches c:\n{}", routers[0]);
    assert_eq!(routes[0].vertices(), vec![w("b"), w("c")]);
    assert_eq!(routes[0].bottleneck_liquidity(), 6.0);
    assert!(routers[0].find_routes(&w("a")).await.unwrap().is_empty());
}
