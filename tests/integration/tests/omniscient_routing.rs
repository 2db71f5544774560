//! Integration test: the omniscient baseline driven through the simulation
//! harness.

use pcn_core::{Algorithm, FeeKind, OmniscientConfig, RouterConfig, StrategyConfig};
use pcn_integration_tests::w;
use pcn_routing::select_cheapest_route;
use pcn_sim::{ChannelConfig, NodeConfig, Simulation, SimulationConfig};

fn node(name: &str, fee: FeeKind) -> NodeConfig {
    NodeConfig {
        name: name.into(),
        strategy: Some(StrategyConfig {
            fee,
            ..StrategyConfig::default()
        }),
    }
}

/// a - b - d and a - c - d, b charging 1%.
fn diamond() -> SimulationConfig {
    SimulationConfig {
        router: RouterConfig::new(Algorithm::Omniscient(OmniscientConfig::default())),
        nodes: vec![
            node("a", FeeKind::NoFee),
            node("b", FeeKind::OnePercent),
            node("c", FeeKind::NoFee),
            node("d", FeeKind::NoFee),
        ],
        channels: vec![
            ChannelConfig::new("a", "b"),
            ChannelConfig::new("a", "c"),
            ChannelConfig::new("b", "d"),
            ChannelConfig::new("c", "d"),
        ],
        ..SimulationConfig::default()
    }
}

// =========================================================================
// Route discovery
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_line_end_to_end_route() {
    let sim = Simulation::from_config(&SimulationConfig::line(4)).await.unwrap();
    let routes = sim.find_routes("n0", "n3").await.unwrap();
    assert!(!routes.is_empty(), "n0 reaches n3");
    assert_eq!(routes[0].hop_count(), 3);
    assert_eq!(routes[0].vertices(), vec![w("n1"), w("n2"), w("n3")]);
    assert_eq!(sim.router("n0").unwrap().known_channels().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cheapest_route_avoids_fee() {
    let sim = Simulation::from_config(&diamond()).await.unwrap();
    let routes = sim.find_routes("a", "d").await.unwrap();
    assert_eq!(routes.len(), 2, "both sides of the diamond are viable");

    let selection = select_cheapest_route(&routes, 1.0).unwrap();
    assert_eq!(selection.routes.len(), 1);
    assert_eq!(selection.routes[0].vertices(), vec![w("c"), w("d")]);
    assert!(selection.overall_fees.abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_payment_larger_than_liquidity_has_no_route() {
    let sim = Simulation::from_config(&diamond()).await.unwrap();
    let routes = sim.find_routes("a", "d").await.unwrap();
    assert!(select_cheapest_route(&routes, 50.0).is_err());
}

// =========================================================================
// Channel removal
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_closed_channel_leaves_view_and_routes() {
    let sim = Simulation::from_config(&diamond()).await.unwrap();
    sim.close_channel("a", "b").await.unwrap();

    for node in sim.nodes() {
        assert!(
            !node
                .router
                .known_channels()
                .iter()
                .any(|c| c.has_wallets(&w("a"), &w("b"))),
            "{} still knows a - b",
            node.peer.name
        );
    }
    let routes = sim.find_routes("a", "d").await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].vertices(), vec![w("c"), w("d")]);
}
