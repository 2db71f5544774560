use crate::types::WalletAddress;

/// Core errors raised by channel and configuration helpers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("wallet {wallet} is not an endpoint of channel {from} <-> {to}")]
    WalletNotInChannel {
        wallet: WalletAddress,
        from: WalletAddress,
        to: WalletAddress,
    },

    #[error("invalid fee: {0}")]
    InvalidFee(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
