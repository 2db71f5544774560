use pcn_core::{CoreError, WalletAddress};
use pcn_network::NetworkError;

/// Errors that can occur within the routing layer.
///
/// Transport failures are normally absorbed by the routers and turned into
/// failed candidates; they only surface here from helpers that talk to a
/// single peer.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no route found from {from} to {to}")]
    NoRoute { from: WalletAddress, to: WalletAddress },

    #[error("peer not found: {0}")]
    PeerNotFound(WalletAddress),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("channel {from} <-> {to} does not belong to peer {peer}")]
    ChannelPeerMismatch {
        from: WalletAddress,
        to: WalletAddress,
        peer: WalletAddress,
    },

    #[error("no route can carry {amount}: liquidity too low for amount plus fees")]
    InsufficientLiquidity { amount: f64 },

    #[error("scoring weights must sum to 1.0, got {sum}")]
    InvalidScoringWeights { sum: f64 },

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RoutingError::NoRoute {
            from: WalletAddress::new("a"),
            to: WalletAddress::new("d"),
        };
        assert_eq!(err.to_string(), "no route found from a to d");

        let err = RoutingError::ChannelPeerMismatch {
            from: WalletAddress::new("a"),
            to: WalletAddress::new("b"),
            peer: WalletAddress::new("c"),
        };
        assert!(err.to_string().contains("does not belong to peer c"));
    }

    #[test]
    fn test_network_error_converts() {
        let err: RoutingError = NetworkError::Channel("closed".into()).into();
        assert!(matches!(err, RoutingError::Network(_)));
    }
}
