//! Integration test: trust-aware reactive routing over the simulation
//! harness.

use pcn_core::{Algorithm, RouterConfig, TrustConfig};
use pcn_integration_tests::w;
use pcn_sim::{ChannelConfig, NodeConfig, Simulation, SimulationConfig};

fn trust(radius: u32) -> RouterConfig {
    RouterConfig::new(Algorithm::Trust(TrustConfig {
        radius,
        ..TrustConfig::default()
    }))
}

fn diamond() -> SimulationConfig {
    SimulationConfig {
        router: trust(10),
        nodes: ["a", "b", "c", "d"]
            .iter()
            .map(|name| NodeConfig {
                name: name.to_string(),
                strategy: None,
            })
            .collect(),
        channels: vec![
            ChannelConfig::new("a", "b"),
            ChannelConfig::new("a", "c"),
            ChannelConfig::new("b", "d"),
            ChannelConfig::new("c", "d"),
        ],
        ..SimulationConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_line_route_and_peer_discovery() {
    let mut config = SimulationConfig::line(4);
    config.router = trust(10);
    let sim = Simulation::from_config(&config).await.unwrap();

    let routes = sim.find_routes("n0", "n3").await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].vertices(), vec![w("n1"), w("n2"), w("n3")]);

    // Discovery caches every peer on the route.
    let peer = sim.router("n0").unwrap().find_peer(&w("n3")).await.unwrap();
    assert_eq!(peer.name, "n3");
}

#[tokio::test(start_paused = true)]
async fn test_radius_limits_flooding() {
    let mut config = SimulationConfig::line(5);
    config.router = trust(1);
    let sim = Simulation::from_config(&config).await.unwrap();

    assert_eq!(sim.find_routes("n0", "n2").await.unwrap().len(), 1);
    assert!(
        sim.find_routes("n0", "n3").await.unwrap().is_empty(),
        "n3 lies beyond the flooding radius"
    );
}

#[tokio::test(start_paused = true)]
async fn test_reports_steer_route_choice() {
    let sim = Simulation::from_config(&diamond()).await.unwrap();
    let a = sim.router("a").unwrap();

    // b fails 8 of 10 interactions, c never fails.
    for i in 0..10 {
        a.report("payment", &w("b"), i < 2);
        a.report("payment", &w("c"), true);
    }

    let routes = sim.find_routes("a", "d").await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(
        routes[0].vertices(),
        vec![w("c"), w("d")],
        "the misbehaving neighbor is avoided"
    );
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_is_not_used() {
    let mut sim = Simulation::from_config(&diamond()).await.unwrap();
    assert_eq!(sim.find_routes("a", "d").await.unwrap().len(), 1);

    sim.close_channel("a", "c").await.unwrap();
    sim.cycle().await.unwrap();
    for _ in 0..3 {
        let routes = sim.find_routes("a", "d").await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].vertices(), vec![w("b"), w("d")]);
    }
    assert!(!sim
        .router("a")
        .unwrap()
        .known_channels()
        .iter()
        .any(|c| c.has_wallets(&w("a"), &w("c"))));
}
