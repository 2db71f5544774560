//! PCN Simulation: drives a population of routers over the simulated
//! network.
//!
//! - [`SimulationConfig`]: TOML-backed description of nodes, channels and
//!   router parameters.
//! - [`Simulation`]: owns the network, the routers and the cycle counter.
//! - [`telemetry`]: tracing subscriber setup and packet trace logging.

pub mod config;
pub mod simulation;
pub mod telemetry;

pub use config::{ChannelConfig, LogFormat, LoggingConfig, NodeConfig, SimulationConfig};
pub use simulation::{Node, Simulation};
