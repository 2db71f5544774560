//! Messages exchanged between routers.
//!
//! Every router family has its own message enum; [`RoutingMessage`] is the
//! single payload type carried by the transport so that one socket type
//! serves all four algorithms.

use pcn_network::NetworkError;
use serde::{Deserialize, Serialize};

use crate::address_tree::AddressTreeMessage;
use crate::height::HeightMessage;
use crate::omniscient::OmniscientMessage;
use crate::trust::TrustMessage;

/// Payload of every routing packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", content = "message", rename_all = "snake_case")]
pub enum RoutingMessage {
    Omniscient(OmniscientMessage),
    Trust(TrustMessage),
    AddressTree(AddressTreeMessage),
    Height(HeightMessage),
}

impl RoutingMessage {
    pub fn family(&self) -> &'static str {
        match self {
            RoutingMessage::Omniscient(_) => "omniscient",
            RoutingMessage::Trust(_) => "trust",
            RoutingMessage::AddressTree(_) => "address_tree",
            RoutingMessage::Height(_) => "height",
        }
    }
}

macro_rules! message_family {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for RoutingMessage {
            fn from(message: $ty) -> Self {
                RoutingMessage::$variant(message)
            }
        }

        impl TryFrom<RoutingMessage> for $ty {
            type Error = NetworkError;

            fn try_from(message: RoutingMessage) -> Result<Self, Self::Error> {
                match message {
                    RoutingMessage::$variant(inner) => Ok(inner),
                    other => Err(NetworkError::UnexpectedResponse(format!(
                        "expected {} message, got {}",
                        stringify!($variant),
                        other.family()
                    ))),
                }
            }
        }
    };
}

message_family!(Omniscient, OmniscientMessage);
message_family!(Trust, TrustMessage);
message_family!(AddressTree, AddressTreeMessage);
message_family!(Height, HeightMessage);
