//! PCN Network: simulated, unreliable packet transport between nodes.
//!
//! Routers talk to each other only through a [`Socket`]. The in-memory
//! [`SimNetwork`] implementation delivers [`Packet`]s between sockets with
//! optional loss and delay, correlates responses with pending requests and
//! publishes a [`PacketTrace`] for every packet to interested observers.

pub mod error;
pub mod network;
pub mod packet;
pub mod socket;

pub use error::NetworkError;
pub use network::{NetworkConfig, SimNetwork, SimSocket};
pub use packet::{DeliveryOutcome, Packet, PacketId, PacketTrace};
pub use socket::Socket;
