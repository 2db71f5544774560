//! Injected node behaviour: how a node prices forwarding and what it tells
//! others about its channels.

use std::fmt;
use std::sync::Arc;

use crate::channel::{ChannelFee, DynamicChannelInformation};
use crate::types::WalletAddress;

/// Decides the fee a node charges for forwarding toward `next_hop`.
pub trait FeeStrategy: Send + Sync + fmt::Debug {
    fn determine(&self, next_hop: &WalletAddress) -> ChannelFee;
}

/// Decides what a node discloses about one of its channels. May misstate.
pub trait DisclosureStrategy: Send + Sync + fmt::Debug {
    fn disclose(&self, info: DynamicChannelInformation) -> DynamicChannelInformation;
}

/// Charges nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFee;

impl FeeStrategy for NoFee {
    fn determine(&self, _next_hop: &WalletAddress) -> ChannelFee {
        ChannelFee::ZERO
    }
}

/// Charges 1% of the forwarded amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnePercentFee;

impl FeeStrategy for OnePercentFee {
    fn determine(&self, _next_hop: &WalletAddress) -> ChannelFee {
        ChannelFee {
            rate: 1.01,
            fixed: 0.0,
        }
    }
}

/// Discloses channel information unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullDisclosure;

impl DisclosureStrategy for FullDisclosure {
    fn disclose(&self, info: DynamicChannelInformation) -> DynamicChannelInformation {
        info
    }
}

/// Understates liquidity to a fraction of the real value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialDisclosure;

impl DisclosureStrategy for PartialDisclosure {
    fn disclose(&self, info: DynamicChannelInformation) -> DynamicChannelInformation {
        DynamicChannelInformation {
            liquidity: info.liquidity / 11.0,
            ..info
        }
    }
}

/// Overstates liquidity tenfold.
#[derive(Debug, Clone, Copy, Default)]
pub struct Boast;

impl DisclosureStrategy for Boast {
    fn disclose(&self, info: DynamicChannelInformation) -> DynamicChannelInformation {
        DynamicChannelInformation {
            liquidity: info.liquidity * 10.0,
            ..info
        }
    }
}

/// The strategy bundle injected into a router at construction.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub fee: Arc<dyn FeeStrategy>,
    pub disclosure: Arc<dyn DisclosureStrategy>,
}

impl Strategy {
    pub fn new(fee: Arc<dyn FeeStrategy>, disclosure: Arc<dyn DisclosureStrategy>) -> Self {
        Self { fee, disclosure }
    }

    /// Fee charged by this node for forwarding toward `next_hop`.
    pub fn fee_toward(&self, next_hop: &WalletAddress) -> ChannelFee {
        self.fee.determine(next_hop)
    }

    pub fn disclose(&self, info: DynamicChannelInformation) -> DynamicChannelInformation {
        self.disclosure.disclose(info)
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::new(Arc::new(NoFee), Arc::new(FullDisclosure))
    }
}
