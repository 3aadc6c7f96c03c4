//! 等级计算
//!
//! 等级只由账本累计值推导，不接受人工直接修改。每次账本变动后随余额投影一起重算。

use loyalty_shared::config::{TierBasis, TierConfig};
use rust_decimal::prelude::ToPrimitive;

use crate::models::{LedgerTotals, Tier};

/// 等级分类器
#[derive(Debug, Clone, Copy)]
pub struct TierClassifier {
    basis: TierBasis,
    silver: i64,
    gold: i64,
    platinum: i64,
}

impl TierClassifier {
    pub fn new(config: &TierConfig) -> Self {
        Self {
            basis: config.basis,
            silver: config.silver,
            gold: config.gold,
            platinum: config.platinum,
        }
    }

    /// 分数 -> 等级，bronze 为下限
    pub fn classify(&self, score: i64) -> Tier {
        if score >= self.platinum {
            Tier::Platinum
        } else if score >= self.gold {
            Tier::Gold
        } else if score >= self.silver {
            Tier::Silver
        } else {
            Tier::Bronze
        }
    }

    /// 按配置的依据从账本累计值取分
    pub fn score(&self, totals: &LedgerTotals) -> i64 {
        match self.basis {
            TierBasis::TotalEarned => totals.total_earned,
            TierBasis::LifetimeValue => totals.lifetime_value.floor().to_i64().unwrap_or(i64::MAX),
        }
    }

    pub fn classify_totals(&self, totals: &LedgerTotals) -> Tier {
        self.classify(self.score(totals))
    }
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self::new(&TierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_classify_boundaries() {
        let tiers = TierClassifier::default();
        assert_eq!(tiers.classify(0), Tier::Bronze);
        assert_eq!(tiers.classify(499), Tier::Bronze);
        assert_eq!(tiers.classify(500), Tier::Silver);
        assert_eq!(tiers.classify(1_999), Tier::Silver);
        assert_eq!(tiers.classify(2_000), Tier::Gold);
        assert_eq!(tiers.classify(5_000), Tier::Platinum);
        assert_eq!(tiers.classify(-10), Tier::Bronze);
    }

    #[test]
    fn test_classify_is_monotonic() {
        let tiers = TierClassifier::default();
        let mut prev = Tier::Bronze;
        for score in (0..6_000).step_by(50) {
            let tier = tiers.classify(score);
            assert!(tier >= prev);
            prev = tier;
        }
    }

    #[test]
    fn test_lifetime_value_basis() {
        let tiers = TierClassifier::new(&TierConfig {
            basis: TierBasis::LifetimeValue,
            ..Default::default()
        });
        let totals = LedgerTotals {
            total_earned: 10,
            lifetime_value: Decimal::new(250_050, 2),
            ..Default::default()
        };
        assert_eq!(tiers.score(&totals), 2_500);
        assert_eq!(tiers.classify_totals(&totals), Tier::Gold);
    }
}
