//! Routing addresses and the identifier order used to validate them.

use pcn_core::WalletAddress;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bit mask covering the low `addr_size` bits.
pub fn address_mask(addr_size: u32) -> u32 {
    if addr_size >= u32::BITS {
        u32::MAX
    } else {
        (1u32 << addr_size) - 1
    }
}

/// Level of the address tree at which `a` and `b` are siblings: the
/// highest differing bit. `None` for equal addresses, which orders before
/// any level.
pub fn level_sibling(a: u32, b: u32, addr_size: u32) -> Option<u32> {
    let diff = (a ^ b) & address_mask(addr_size);
    if diff == 0 {
        None
    } else {
        Some(u32::BITS - 1 - diff.leading_zeros())
    }
}

/// DHT anchor of `wallet`: the first four bytes of its SHA-256 digest,
/// big-endian, truncated to `addr_size` bits.
pub fn anchor_address(wallet: &WalletAddress, addr_size: u32) -> u32 {
    let digest = Sha256::digest(wallet.as_str().as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head & address_mask(addr_size)
}

/// Binary rendering padded to `addr_size` digits, `-` without an address.
pub fn format_address(address: Option<u32>, addr_size: u32) -> String {
    match address {
        Some(a) => format!("{a:0width$b}", width = addr_size as usize),
        None => "-".to_string(),
    }
}

/// Smallest identifier within an address subtree. An empty subtree is
/// `Unbounded`, which compares greater than every wallet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubtreeId {
    Wallet(WalletAddress),
    Unbounded,
}

impl From<WalletAddress> for SubtreeId {
    fn from(wallet: WalletAddress) -> Self {
        SubtreeId::Wallet(wallet)
    }
}

impl std::fmt::Display for SubtreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtreeId::Wallet(w) => write!(f, "{w}"),
            SubtreeId::Unbounded => write!(f, "INFINITE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_sibling() {
        assert_eq!(level_sibling(0b0000, 0b0000, 4), None);
        assert_eq!(level_sibling(0b0000, 0b0001, 4), Some(0));
        assert_eq!(level_sibling(0b1010, 0b0010, 4), Some(3));
        assert_eq!(level_sibling(0b0110, 0b0101, 4), Some(1));
        // Bits above the address size are ignored.
        assert_eq!(level_sibling(0b1_0000, 0b0_0000, 4), None);
    }

    #[test]
    fn test_equal_addresses_sort_first() {
        let mut levels = vec![Some(2), None, Some(0)];
        levels.sort();
        assert_eq!(levels, vec![None, Some(0), Some(2)]);
    }

    #[test]
    fn test_anchor_is_stable_and_masked() {
        let w = WalletAddress::new("wallet-7");
        let a = anchor_address(&w, 6);
        assert_eq!(a, anchor_address(&w, 6));
        assert!(a < 64);
        assert_eq!(anchor_address(&w, 32) & address_mask(6), a);
    }

    #[test]
    fn test_subtree_id_order() {
        let a = SubtreeId::from(WalletAddress::new("a"));
        let z = SubtreeId::from(WalletAddress::new("zzzz"));
        assert!(a < z);
        assert!(z < SubtreeId::Unbounded);
    }

    #[test]
    fn test_format_address() {
        assert_eq!(format_address(Some(5), 6), "000101");
        assert_eq!(format_address(None, 6), "-");
    }
}
