//! Transport error types.

use pcn_core::NetworkAddress;

use crate::packet::PacketId;

/// Errors raised by sockets. Routers treat every variant as "this candidate
/// failed" rather than aborting a search.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The local socket was closed.
    #[error("socket {0} is closed")]
    SocketClosed(NetworkAddress),

    /// No socket is listening at the receiver address.
    #[error("packet to {0} is undeliverable")]
    Undeliverable(NetworkAddress),

    /// No response arrived within the timeout window.
    #[error("request {id} to {receiver} unanswered after {timeout_ms} ms")]
    RequestUnanswered {
        receiver: NetworkAddress,
        id: PacketId,
        timeout_ms: u64,
    },

    /// A response arrived but its payload did not match the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Another socket already owns the address.
    #[error("address {0} is already in use")]
    AddressInUse(NetworkAddress),

    /// Internal channel send/receive failure.
    #[error("channel error: {0}")]
    Channel(String),
}
