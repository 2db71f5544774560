use pcn_core::NetworkAddress;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id of a packet.
pub type PacketId = Uuid;

/// Envelope carried by the transport. The payload is opaque to the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet<M> {
    pub id: PacketId,
    pub sender: NetworkAddress,
    pub receiver: NetworkAddress,
    pub payload: M,
    /// Set on responses: the id of the request being answered.
    pub responding_to: Option<PacketId>,
}

impl<M> Packet<M> {
    pub fn new(sender: NetworkAddress, receiver: NetworkAddress, payload: M) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
            receiver,
            payload,
            responding_to: None,
        }
    }

    pub fn response(
        sender: NetworkAddress,
        receiver: NetworkAddress,
        request_id: PacketId,
        payload: M,
    ) -> Self {
        Self {
            responding_to: Some(request_id),
            ..Self::new(sender, receiver, payload)
        }
    }

    pub fn is_response(&self) -> bool {
        self.responding_to.is_some()
    }
}

/// What happened to a packet once handed to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// Lost on purpose by the configured loss probability.
    Dropped,
    /// No socket at the receiver address.
    Undeliverable,
    /// A response whose request already timed out.
    Late,
}

/// Observer record published for every packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketTrace {
    pub id: PacketId,
    pub sender: NetworkAddress,
    pub receiver: NetworkAddress,
    pub responding_to: Option<PacketId>,
    /// JSON rendering of the payload.
    pub payload: serde_json::Value,
    pub outcome: DeliveryOutcome,
}

impl PacketTrace {
    pub(crate) fn of<M: Serialize>(packet: &Packet<M>, outcome: DeliveryOutcome) -> Self {
        Self {
            id: packet.id,
            sender: packet.sender.clone(),
            receiver: packet.receiver.clone(),
            responding_to: packet.responding_to,
            payload: serde_json::to_value(&packet.payload).unwrap_or(serde_json::Value::Null),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_ids_are_unique() {
        let a = Packet::new("a".into(), "b".into(), 1u8);
        let b = Packet::new("a".into(), "b".into(), 1u8);
        assert_ne!(a.id, b.id);
        assert!(!a.is_response());
    }

    #[test]
    fn test_response_references_request() {
        let request = Packet::new(NetworkAddress::new("a"), NetworkAddress::new("b"), "ping");
        let response = Packet::response(
            request.receiver.clone(),
            request.sender.clone(),
            request.id,
            "pong",
        );
        assert_eq!(response.responding_to, Some(request.id));
        assert_eq!(response.receiver, NetworkAddress::new("a"));
    }

    #[test]
    fn test_trace_renders_payload_as_json() {
        let packet = Packet::new(NetworkAddress::new("a"), NetworkAddress::new("b"), vec![1, 2]);
        let trace = PacketTrace::of(&packet, DeliveryOutcome::Delivered);
        assert_eq!(trace.payload, serde_json::json!([1, 2]));
        assert_eq!(trace.outcome, DeliveryOutcome::Delivered);
    }
}
