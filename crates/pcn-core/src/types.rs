use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a node's wallet. Never changes during a simulation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Create a wallet address from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Transient transport location of a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkAddress(String);

impl NetworkAddress {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetworkAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Raw public key bytes, displayed as hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Publicly available information about a node.
///
/// A `Peer` is an immutable snapshot: when a node moves to another network
/// address a new `Peer` value replaces the old one in every cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    /// Human-readable node name.
    pub name: String,
    /// The node's public key.
    pub public_key: PublicKey,
    /// Stable wallet identity.
    pub wallet_address: WalletAddress,
    /// Current transport address.
    pub network_address: NetworkAddress,
}

impl Peer {
    pub fn new(
        name: impl Into<String>,
        public_key: PublicKey,
        wallet_address: WalletAddress,
        network_address: NetworkAddress,
    ) -> Self {
        Self {
            name: name.into(),
            public_key,
            wallet_address,
            network_address,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}@{})",
            self.name, self.wallet_address, self.network_address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_address_ordering() {
        let a = WalletAddress::new("alice");
        let b = WalletAddress::new("bob");
        assert!(a < b);
        assert_eq!(a.to_string(), "alice");
    }

    #[test]
    fn test_public_key_displays_hex() {
        let key = PublicKey::from_bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(key.to_string(), "deadbeef");
    }

    #[test]
    fn test_peer_serde_roundtrip() {
        let peer = Peer::new(
            "node-1",
            PublicKey::from_bytes(vec![1, 2, 3]),
            WalletAddress::new("w1"),
            NetworkAddress::new("10.0.0.1"),
        );
        let json = serde_json::to_string(&peer).unwrap();
        assert!(json.contains("\"wallet_address\":\"w1\""));
        let decoded: Peer = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, peer);
    }
}
