use pcn_core::WalletAddress;
use serde::{Deserialize, Serialize};

/// Position of a node in the destination-oriented DAG.
///
/// Heights order lexicographically by reference level (`tau`, `oid`,
/// `reflected`), then `delta`, then the owner `id`. Packets flow from
/// higher to lower heights.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Height {
    /// Cycle the reference level was created.
    pub tau: i64,
    /// Node that created the reference level.
    pub oid: Option<WalletAddress>,
    pub reflected: bool,
    /// Order within the reference level.
    pub delta: i64,
    pub id: WalletAddress,
}

impl Height {
    pub fn null(id: WalletAddress) -> Self {
        Self {
            tau: -1,
            oid: None,
            reflected: false,
            delta: -1,
            id,
        }
    }

    pub fn zero(id: WalletAddress) -> Self {
        Self {
            tau: 0,
            oid: None,
            reflected: false,
            delta: 0,
            id,
        }
    }

    /// A fresh reference level created by `id` at `cycle`.
    pub fn generated(id: WalletAddress, cycle: u64) -> Self {
        Self {
            tau: i64::try_from(cycle).unwrap_or(i64::MAX),
            oid: Some(id.clone()),
            reflected: false,
            delta: 0,
            id,
        }
    }

    pub fn is_null(&self) -> bool {
        self.tau == -1 && self.oid.is_none() && !self.reflected && self.delta == -1
    }

    pub fn to_null(&self) -> Self {
        Self::null(self.id.clone())
    }

    pub fn to_zero(&self) -> Self {
        Self::zero(self.id.clone())
    }

    /// Adopt `other`'s reference level one step above it.
    pub fn to_reference_level(&self, other: &Height) -> Self {
        Self {
            tau: other.tau,
            oid: other.oid.clone(),
            reflected: other.reflected,
            delta: other.delta + 1,
            id: self.id.clone(),
        }
    }

    pub fn same_reference_level(&self, other: &Height) -> bool {
        self.tau == other.tau && self.oid == other.oid && self.reflected == other.reflected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Undirected,
    Upstream,
    Downstream,
}

/// A neighbor as seen for one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborLink {
    pub id: WalletAddress,
    /// Cycle the link came up.
    pub active_since: u64,
    pub height: Height,
    pub status: LinkStatus,
}

impl NeighborLink {
    pub fn new(id: WalletAddress, active_since: u64) -> Self {
        Self {
            height: Height::null(id.clone()),
            id,
            active_since,
            status: LinkStatus::Undirected,
        }
    }

    /// Direct the link relative to our own height. Equal heights keep the
    /// current status.
    pub fn update_status(&mut self, own: &Height) {
        if self.height.is_null() {
            self.status = LinkStatus::Undirected;
        } else if own.is_null() || self.height < *own {
            self.status = LinkStatus::Downstream;
        } else if self.height > *own {
            self.status = LinkStatus::Upstream;
        }
    }
}
