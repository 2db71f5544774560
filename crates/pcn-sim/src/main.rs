//! PCN Simulation: entry point.
//!
//! Builds the network described by a TOML file, runs the configured number
//! of cycles and reports how many node pairs found a route.

use std::path::PathBuf;

use clap::Parser;
use pcn_routing::select_cheapest_route;
use pcn_sim::telemetry::{init_tracing, spawn_packet_logger};
use pcn_sim::{Simulation, SimulationConfig};

/// PCN routing simulation
#[derive(Parser, Debug)]
#[command(name = "pcn-sim", version, about = "Payment-channel network routing simulation")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "pcn-sim.toml")]
    config: PathBuf,

    /// Override the number of cycles.
    #[arg(long)]
    cycles: Option<u64>,

    /// Payment amount used to check route capacity.
    #[arg(long, default_value_t = 1.0)]
    amount: f64,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Write an example config (a 5-node line) and exit.
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init {
        SimulationConfig::line(5).save(&args.config)?;
        println!("wrote example config to {}", args.config.display());
        return Ok(());
    }

    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(cycles) = args.cycles {
        config.cycles = cycles;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging)?;

    tracing::info!("PCN Simulation v{}", env!("CARGO_PKG_VERSION"));

    let mut sim = Simulation::from_config(&config).await?;
    if config.logging.packet_traces {
        spawn_packet_logger(sim.network());
    }
    sim.run(config.cycles).await?;

    let names: Vec<String> = sim.nodes().map(|n| n.peer.name.clone()).collect();
    let (mut pairs, mut routed, mut payable) = (0usize, 0usize, 0usize);
    for from in &names {
        for to in names.iter().filter(|to| *to != from) {
            pairs += 1;
            let routes = match sim.find_routes(from, to).await {
                Ok(routes) => routes,
                Err(e) => {
                    tracing::warn!(%from, %to, error = %e, "route discovery failed");
                    continue;
                }
            };
            if routes.is_empty() {
                continue;
            }
            routed += 1;
            if select_cheapest_route(&routes, args.amount).is_ok() {
                payable += 1;
            }
        }
    }

    tracing::info!(pairs, routed, payable, amount = args.amount, "route discovery summary");
    Ok(())
}
