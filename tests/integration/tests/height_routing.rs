//! Integration test: loop freedom and churn handling of the height-based
//! router.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use pcn_core::{HeightConfig, RouterConfig, StaticChannelInformation, WalletAddress};
use pcn_integration_tests::{channel, run_cycles, setup, w};
use pcn_network::{NetworkConfig, SimNetwork};
use pcn_routing::{HeightRouter, Router, RoutingMessage};

const NAMES: [&str; 5] = ["a", "b", "c", "d", "e"];

/// Ring a - b - c - d - e - a with the chord b - d.
fn ring_with_chord() -> Vec<StaticChannelInformation> {
    vec![
        channel("a", "b", 10.0),
        channel("b", "c", 10.0),
        channel("c", "d", 10.0),
        channel("d", "e", 10.0),
        channel("e", "a", 10.0),
        channel("b", "d", 10.0),
    ]
}

fn build(channels: &[StaticChannelInformation]) -> BTreeMap<WalletAddress, Arc<HeightRouter>> {
    let network = SimNetwork::<RoutingMessage>::new(NetworkConfig::default());
    NAMES
        .iter()
        .map(|name| {
            let router = HeightRouter::new(
                setup(&network, name, channels, RouterConfig::default()),
                HeightConfig::default(),
            )
            .unwrap();
            (w(name), router)
        })
        .collect()
}

/// Depth-first search for a cycle in the downstream graph toward `target`.
fn has_cycle(routers: &BTreeMap<WalletAddress, Arc<HeightRouter>>, target: &WalletAddress) -> bool {
    fn visit(
        node: &WalletAddress,
        edges: &BTreeMap<WalletAddress, Vec<WalletAddress>>,
        on_stack: &mut BTreeSet<WalletAddress>,
        done: &mut BTreeSet<WalletAddress>,
    ) -> bool {
        if on_stack.contains(node) {
            return true;
        }
        if !done.insert(node.clone()) {
            return false;
        }
        on_stack.insert(node.clone());
        let found = edges
            .get(node)
            .into_iter()
            .flatten()
            .any(|next| visit(next, edges, on_stack, done));
        on_stack.remove(node);
        found
    }

    let edges: BTreeMap<WalletAddress, Vec<WalletAddress>> = routers
        .iter()
        .map(|(wallet, router)| (wallet.clone(), router.downstream_links(target)))
        .collect();
    let (mut on_stack, mut done) = (BTreeSet::new(), BTreeSet::new());
    edges
        .keys()
        .any(|start| visit(start, &edges, &mut on_stack, &mut done))
}

#[tokio::test(start_paused = true)]
async fn test_downstream_graph_is_acyclic() {
    let routers = build(&ring_with_chord());
    let a = &routers[&w("a")];

    let routes = a.find_routes(&w("c")).await.unwrap();
    assert!(!routes.is_empty(), "a reaches c");
    for route in &routes {
        assert_eq!(route.vertices().last(), Some(&w("c")));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!has_cycle(&routers, &w("c")), "downstream links toward c form a cycle");

    // Every downstream link points to a strictly lower height.
    for (wallet, router) in &routers {
        let Some(mine) = router.height(&w("c")) else {
            continue;
        };
        for next in router.downstream_links(&w("c")) {
            if let Some(theirs) = routers[&next].height(&w("c")) {
                assert!(mine > theirs, "{wallet} -> {next}: {mine:?} vs {theirs:?}");
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_acyclic_after_link_failure() {
    let routers = build(&ring_with_chord());
    let all: Vec<Arc<HeightRouter>> = routers.values().cloned().collect();
    assert!(!routers[&w("a")].find_routes(&w("c")).await.unwrap().is_empty());

    run_cycles(&all, 1..3, Duration::from_millis(10)).await;
    routers[&w("b")].remove_channel(&w("c")).await.unwrap();
    routers[&w("c")].remove_channel(&w("b")).await.unwrap();
    // Channel changes are announced on the next cycle.
    run_cycles(&all, 3..6, Duration::from_millis(50)).await;

    assert!(!has_cycle(&routers, &w("c")));
    let routes = routers[&w("a")].find_routes(&w("c")).await.unwrap();
    for route in &routes {
        let hops = route.vertices();
        assert!(
            !hops.windows(2).any(|p| (p[0] == w("b") && p[1] == w("c"))),
            "route uses the removed channel: {hops:?}"
        );
    }
}
