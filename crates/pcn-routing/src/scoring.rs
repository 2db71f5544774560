//! Route and trust scoring used by the trust-aware and height-based routers.

use pcn_core::ChannelFee;
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

fn check_sum(sum: f64) -> Result<(), RoutingError> {
    if (sum - 1.0).abs() > 1e-6 {
        return Err(RoutingError::InvalidScoringWeights { sum });
    }
    Ok(())
}

/// Weights of the composite routing function (CRF).
///
/// The CRF is a cost, so smaller is better and the value may be negative:
///   `crf = trust * level - liquidity * max_flow + fixed_fee * fee.fixed
///          + rate_fee * fee.rate + hop_count * hops`
///
/// All weights must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub trust: f64,
    pub liquidity: f64,
    pub fixed_fee: f64,
    pub rate_fee: f64,
    pub hop_count: f64,
}

impl CompositeWeights {
    pub fn new(
        trust: f64,
        liquidity: f64,
        fixed_fee: f64,
        rate_fee: f64,
        hop_count: f64,
    ) -> Result<Self, RoutingError> {
        let weights = Self {
            trust,
            liquidity,
            fixed_fee,
            rate_fee,
            hop_count,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), RoutingError> {
        check_sum(self.trust + self.liquidity + self.fixed_fee + self.rate_fee + self.hop_count)
    }

    /// Cost of a route through a next hop of the given trust level.
    pub fn cost(&self, level: TrustLevel, max_flow: f64, fee: &ChannelFee, hop_count: u32) -> f64 {
        self.trust * level.value()
            - self.liquidity * max_flow
            + self.fixed_fee * fee.fixed
            + self.rate_fee * fee.rate
            + self.hop_count * f64::from(hop_count)
    }
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            trust: 0.25,
            liquidity: 0.25,
            fixed_fee: 0.07,
            rate_fee: 0.18,
            hop_count: 0.25,
        }
    }
}

/// Trust class of a node.
///
/// | level | combined trust  | class        |
/// |-------|-----------------|--------------|
/// | 1     | (threshold, 1]  | trusted      |
/// | 2     | (0.5, threshold]| less trusted |
/// | 3     | 0.5             | indecisive   |
/// | 4     | [0, 0.5)        | misbehaving  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrustLevel {
    Trusted = 1,
    LessTrusted = 2,
    Indecisive = 3,
    Misbehaving = 4,
}

impl TrustLevel {
    pub fn value(self) -> f64 {
        f64::from(self as u8)
    }
}

/// How direct and indirect trust are blended into a [`TrustLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustBlend {
    pub direct: f64,
    pub indirect: f64,
    /// Combined trust above this value is [`TrustLevel::Trusted`].
    pub threshold: f64,
}

impl TrustBlend {
    pub fn new(direct: f64, indirect: f64, threshold: f64) -> Result<Self, RoutingError> {
        check_sum(direct + indirect)?;
        Ok(Self {
            direct,
            indirect,
            threshold,
        })
    }

    pub fn combine(&self, direct: f64, indirect: f64) -> f64 {
        self.direct * direct + self.indirect * indirect
    }

    pub fn level(&self, direct: f64, indirect: f64) -> TrustLevel {
        let t = self.combine(direct, indirect);
        if t > self.threshold {
            TrustLevel::Trusted
        } else if t > 0.5 {
            TrustLevel::LessTrusted
        } else if t == 0.5 {
            TrustLevel::Indecisive
        } else {
            TrustLevel::Misbehaving
        }
    }
}

impl Default for TrustBlend {
    fn default() -> Self {
        Self {
            direct: 0.6,
            indirect: 0.4,
            threshold: 0.6,
        }
    }
}

/// Success/total counters fed by `report`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTally {
    pub total: u64,
    pub successful: u64,
}

impl ReportTally {
    pub fn record(&mut self, successful: bool) {
        self.total += 1;
        if successful {
            self.successful += 1;
        }
    }

    /// Fraction of successful interactions, 0.5 without evidence.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.5
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

/// Score for choosing among annotated downstream routes; larger is better.
///
///   `c = alpha * (min / avg liquidity) + (1 - alpha) * (shortest / hops)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteChoiceWeights {
    pub alpha: f64,
}

impl RouteChoiceWeights {
    pub fn new(alpha: f64) -> Result<Self, RoutingError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(RoutingError::InvalidScoringWeights { sum: alpha });
        }
        Ok(Self { alpha })
    }

    pub fn score(&self, min_liquidity: f64, avg_liquidity: f64, shortest: usize, hops: usize) -> f64 {
        let liquidity = if avg_liquidity > 0.0 {
            min_liquidity / avg_liquidity
        } else {
            0.0
        };
        let length = if hops > 0 {
            shortest as f64 / hops as f64
        } else {
            0.0
        };
        self.alpha * liquidity + (1.0 - self.alpha) * length
    }
}

impl Default for RouteChoiceWeights {
    fn default() -> Self {
        Self { alpha: 0.7 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!(CompositeWeights::default().validate().is_ok());
        assert!(CompositeWeights::new(0.5, 0.5, 0.5, 0.0, 0.0).is_err());
        assert!(TrustBlend::new(0.7, 0.7, 0.6).is_err());
    }

    #[test]
    fn test_trust_levels() {
        let blend = TrustBlend::default();
        assert_eq!(blend.level(0.5, 0.5), TrustLevel::Indecisive);
        assert_eq!(blend.level(1.0, 0.5), TrustLevel::Trusted);
        assert_eq!(blend.level(0.6, 0.5), TrustLevel::LessTrusted);
        assert_eq!(blend.level(0.2, 0.5), TrustLevel::Misbehaving);
    }

    #[test]
    fn test_crf_prefers_trusted_and_liquid() {
        let w = CompositeWeights::default();
        let fee = ChannelFee::ZERO;
        let trusted = w.cost(TrustLevel::Trusted, 10.0, &fee, 2);
        let misbehaving = w.cost(TrustLevel::Misbehaving, 10.0, &fee, 2);
        assert!(trusted < misbehaving);
        let illiquid = w.cost(TrustLevel::Trusted, 1.0, &fee, 2);
        assert!(trusted < illiquid, "more liquidity must lower the cost");
    }

    #[test]
    fn test_tally_ratio() {
        let mut tally = ReportTally::default();
        assert_eq!(tally.ratio(), 0.5);
        for i in 0..10 {
            tally.record(i < 2);
        }
        assert!((tally.ratio() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_route_choice_score() {
        let w = RouteChoiceWeights::default();
        let balanced_short = w.score(5.0, 5.0, 2, 2);
        assert!((balanced_short - 1.0).abs() < 1e-12);
        let skewed_long = w.score(1.0, 5.0, 2, 4);
        assert!(skewed_long < balanced_short);
        assert!(RouteChoiceWeights::new(1.5).is_err());
    }
}
