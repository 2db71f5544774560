//! PCN Routing: distributed route discovery for the payment-channel network.
//!
//! This crate provides:
//! - [`Router`]: the contract every routing algorithm implements, and
//!   [`build_router`] to pick one from a [`pcn_core::RouterConfig`].
//! - [`RouterBase`]: neighbor table, bounded peer/channel caches and typed
//!   transport access shared by the routers.
//! - [`OmniscientRouter`]: baseline with a global view of the network.
//! - [`TrustRouter`]: reactive flooding guided by direct and indirect trust.
//! - [`AddressTreeRouter`]: tree-structured routing addresses with a DHT.
//! - [`HeightRouter`]: loop-free routing over per-destination heights.
//! - [`Route`] and [`select_cheapest_route`]: candidate paths and the
//!   choice among them.

pub mod address_tree;
pub mod base;
pub mod error;
pub mod height;
pub mod omniscient;
pub mod protocol;
pub mod route;
pub mod router;
pub mod scoring;
pub mod trust;

// Re-exports for convenience.
pub use address_tree::{AddressTreeMessage, AddressTreeRouter};
pub use base::{Neighbor, RouterBase, RouterSetup};
pub use error::RoutingError;
pub use height::{Height, HeightMessage, HeightRouter, LinkStatus};
pub use omniscient::{GlobalView, OmniscientMessage, OmniscientRouter};
pub use protocol::RoutingMessage;
pub use route::{select_cheapest_route, Route, RouteSelection};
pub use router::{build_router, spawn_listener, PacketHandler, ProtocolRouter, Router};
pub use scoring::{CompositeWeights, ReportTally, RouteChoiceWeights, TrustBlend, TrustLevel};
pub use trust::{TrustMessage, TrustRouter};
