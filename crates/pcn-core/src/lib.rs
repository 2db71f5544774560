//! PCN Core: shared vocabulary of the payment-channel network simulation.
//!
//! This crate provides:
//! - [`WalletAddress`], [`NetworkAddress`] and [`Peer`]: node identity.
//! - [`ChannelFee`], [`StaticChannelInformation`] and [`DynamicChannelInformation`]:
//!   channel economics and liquidity snapshots.
//! - [`FeeStrategy`], [`DisclosureStrategy`] and [`Strategy`]: injected node behaviour.
//! - [`RouterConfig`]: per-algorithm routing parameters.

pub mod channel;
pub mod config;
pub mod error;
pub mod strategy;
pub mod types;

pub use channel::{ChannelFee, DynamicChannelInformation, StaticChannelInformation};
pub use config::{
    AddressTreeConfig, Algorithm, DisclosureKind, FeeKind, GapFilling, HeightConfig,
    OmniscientConfig, RouterConfig, StrategyConfig, TrustConfig,
};
pub use error::CoreError;
pub use strategy::{
    Boast, DisclosureStrategy, FeeStrategy, FullDisclosure, NoFee, OnePercentFee,
    PartialDisclosure, Strategy,
};
pub use types::{NetworkAddress, Peer, PublicKey, WalletAddress};
