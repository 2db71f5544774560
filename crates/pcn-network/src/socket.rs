use std::time::Duration;

use async_trait::async_trait;
use pcn_core::NetworkAddress;
use tokio::sync::mpsc;

use crate::error::NetworkError;
use crate::packet::{Packet, PacketId};

/// A node's endpoint on the transport.
///
/// Requests are correlated with their responses by packet id; responses
/// never show up on the inbound receiver.
#[async_trait]
pub trait Socket<M: Send + 'static>: Send + Sync {
    /// Current address of this socket.
    fn address(&self) -> &NetworkAddress;

    /// Fire-and-forget delivery.
    async fn notify(&self, receiver: &NetworkAddress, payload: M) -> Result<(), NetworkError>;

    /// Send `payload` and wait up to `timeout` for the response payload.
    async fn request(
        &self,
        receiver: &NetworkAddress,
        payload: M,
        timeout: Duration,
    ) -> Result<M, NetworkError>;

    /// Answer the request `request_id` previously received from `receiver`.
    async fn respond(
        &self,
        receiver: &NetworkAddress,
        request_id: PacketId,
        payload: M,
    ) -> Result<(), NetworkError>;

    /// Hand out the stream of inbound (non-response) packets. Only the first
    /// call returns `Some`.
    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Packet<M>>>;

    /// Stop sending and receiving.
    fn close(&self);
}
