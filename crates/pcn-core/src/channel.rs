use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::WalletAddress;

/// Fee charged for forwarding a payment over one channel.
///
/// `rate` is a multiplicative factor, so a 1% fee is `rate = 1.01` and
/// [`ChannelFee::ZERO`] has `rate = 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelFee {
    pub rate: f64,
    pub fixed: f64,
}

impl ChannelFee {
    /// The neutral fee: leaves every payment unchanged.
    pub const ZERO: ChannelFee = ChannelFee {
        rate: 1.0,
        fixed: 0.0,
    };

    /// Create a fee, rejecting rates that would shrink or zero a payment.
    pub fn new(rate: f64, fixed: f64) -> Result<Self, CoreError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(CoreError::InvalidFee(format!("rate must be positive, got {rate}")));
        }
        if !fixed.is_finite() {
            return Err(CoreError::InvalidFee(format!("fixed fee must be finite, got {fixed}")));
        }
        Ok(Self { rate, fixed })
    }

    /// Amount that has to enter the channel so that `payment` leaves it.
    pub fn add_to_payment(&self, payment: f64) -> f64 {
        payment * self.rate + self.fixed
    }

    /// Inverse of [`add_to_payment`](Self::add_to_payment).
    pub fn remove_from_payment(&self, payment: f64) -> f64 {
        (payment - self.fixed) / self.rate
    }

    /// Compose with the fee of the hop *before* this one.
    ///
    /// Not commutative: `self` must already contain every hop after `other`.
    pub fn add(&self, other: &ChannelFee) -> ChannelFee {
        ChannelFee {
            rate: self.rate * other.rate,
            fixed: self.fixed * other.rate + other.fixed,
        }
    }

    /// Fold a sequence of per-hop fees, ordered from the first hop to the
    /// last, into one fee. Folding starts at the last hop.
    pub fn compose<'a>(fees: impl DoubleEndedIterator<Item = &'a ChannelFee>) -> ChannelFee {
        fees.rev().fold(ChannelFee::ZERO, |acc, fee| acc.add(fee))
    }
}

impl Default for ChannelFee {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Last agreed funding split of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticChannelInformation {
    pub from_wallet: WalletAddress,
    pub from_liquidity: f64,
    pub to_wallet: WalletAddress,
    pub to_liquidity: f64,
}

impl StaticChannelInformation {
    pub fn new(
        from_wallet: WalletAddress,
        from_liquidity: f64,
        to_wallet: WalletAddress,
        to_liquidity: f64,
    ) -> Self {
        Self {
            from_wallet,
            from_liquidity,
            to_wallet,
            to_liquidity,
        }
    }

    /// Total funds locked in the channel.
    pub fn funding(&self) -> f64 {
        self.from_liquidity + self.to_liquidity
    }

    pub fn has_wallet(&self, wallet: &WalletAddress) -> bool {
        &self.from_wallet == wallet || &self.to_wallet == wallet
    }

    /// True if the channel connects `a` and `b`, in either orientation.
    pub fn has_wallets(&self, a: &WalletAddress, b: &WalletAddress) -> bool {
        (&self.from_wallet == a && &self.to_wallet == b)
            || (&self.from_wallet == b && &self.to_wallet == a)
    }

    /// The endpoint that is not `wallet`.
    pub fn other_wallet(&self, wallet: &WalletAddress) -> Result<&WalletAddress, CoreError> {
        if &self.from_wallet == wallet {
            Ok(&self.to_wallet)
        } else if &self.to_wallet == wallet {
            Ok(&self.from_wallet)
        } else {
            Err(self.not_in_channel(wallet))
        }
    }

    /// Spendable balance on `wallet`'s side.
    pub fn liquidity(&self, wallet: &WalletAddress) -> Result<f64, CoreError> {
        if &self.from_wallet == wallet {
            Ok(self.from_liquidity)
        } else if &self.to_wallet == wallet {
            Ok(self.to_liquidity)
        } else {
            Err(self.not_in_channel(wallet))
        }
    }

    /// Directional view of the channel as seen from `source`.
    pub fn to_dynamic(
        &self,
        source: &WalletAddress,
        fee: ChannelFee,
    ) -> Result<DynamicChannelInformation, CoreError> {
        let liquidity = self.liquidity(source)?;
        let target = self.other_wallet(source)?;
        Ok(DynamicChannelInformation {
            from_wallet: source.clone(),
            to_wallet: target.clone(),
            liquidity,
            fee,
        })
    }

    fn not_in_channel(&self, wallet: &WalletAddress) -> CoreError {
        CoreError::WalletNotInChannel {
            wallet: wallet.clone(),
            from: self.from_wallet.clone(),
            to: self.to_wallet.clone(),
        }
    }
}

/// Live, directional and possibly selectively disclosed view of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicChannelInformation {
    pub from_wallet: WalletAddress,
    pub to_wallet: WalletAddress,
    pub liquidity: f64,
    pub fee: ChannelFee,
}

impl DynamicChannelInformation {
    pub fn new(
        from_wallet: WalletAddress,
        to_wallet: WalletAddress,
        liquidity: f64,
        fee: ChannelFee,
    ) -> Self {
        Self {
            from_wallet,
            to_wallet,
            liquidity,
            fee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(s: &str) -> WalletAddress {
        WalletAddress::new(s)
    }

    #[test]
    fn test_zero_fee_is_neutral() {
        assert_eq!(ChannelFee::ZERO.add_to_payment(42.0), 42.0);
        assert_eq!(ChannelFee::ZERO.add(&ChannelFee::ZERO), ChannelFee::ZERO);
    }

    #[test]
    fn test_fee_add_and_remove_are_inverse() {
        let fee = ChannelFee::new(1.01, 0.5).unwrap();
        let gross = fee.add_to_payment(100.0);
        assert!((gross - 101.5).abs() < 1e-9);
        assert!((fee.remove_from_payment(gross) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_fee_composition_is_not_commutative() {
        let a = ChannelFee::new(2.0, 0.0).unwrap();
        let b = ChannelFee::new(1.0, 3.0).unwrap();
        assert_ne!(a.add(&b), b.add(&a));
    }

    #[test]
    fn test_compose_folds_from_last_hop() {
        // First hop charges 1 fixed, second hop doubles.
        let first = ChannelFee::new(1.0, 1.0).unwrap();
        let second = ChannelFee::new(2.0, 0.0).unwrap();
        let total = ChannelFee::compose([first, second].iter());
        // 10 leaves the second hop -> 20 enters it -> 21 enters the first hop.
        assert!((total.add_to_payment(10.0) - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        assert!(ChannelFee::new(0.0, 0.0).is_err());
        assert!(ChannelFee::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_static_channel_helpers() {
        let ch = StaticChannelInformation::new(w("a"), 7.0, w("b"), 3.0);
        assert_eq!(ch.funding(), 10.0);
        assert!(ch.has_wallets(&w("b"), &w("a")));
        assert!(!ch.has_wallet(&w("c")));
        assert_eq!(ch.other_wallet(&w("a")).unwrap(), &w("b"));
        assert_eq!(ch.liquidity(&w("b")).unwrap(), 3.0);
        assert!(ch.liquidity(&w("c")).is_err());
    }

    #[test]
    fn test_to_dynamic_switches_orientation() {
        let ch = StaticChannelInformation::new(w("a"), 7.0, w("b"), 3.0);
        let dynamic = ch.to_dynamic(&w("b"), ChannelFee::ZERO).unwrap();
        assert_eq!(dynamic.from_wallet, w("b"));
        assert_eq!(dynamic.to_wallet, w("a"));
        assert_eq!(dynamic.liquidity, 3.0);

        let err = ch.to_dynamic(&w("z"), ChannelFee::ZERO).unwrap_err();
        assert!(err.to_string().contains("not an endpoint"));
    }
}
