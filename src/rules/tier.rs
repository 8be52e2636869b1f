use rust_decimal::Decimal;
use serde::Serialize;

use crate::rules::LoyaltyTier;

/// Lifetime points at which a shopper becomes silver
pub const SILVER_THRESHOLD: i64 = 10_000;

/// Lifetime points at which a shopper becomes gold
pub const GOLD_THRESHOLD: i64 = 50_000;

/// Tier and multiplier for a lifetime points total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierAssignment {
    pub tier: LoyaltyTier,
    pub multiplier: Decimal,
}

/// Result of re-classifying a shopper after a credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromotionCheck {
    pub tier: LoyaltyTier,
    pub multiplier: Decimal,
    /// True when the classification differs from the shopper's stored tier
    pub promoted: bool,
}

/// Maps lifetime points onto loyalty tiers
pub struct TierClassifier;

impl TierClassifier {
    pub fn classify(total_points_earned: i64) -> TierAssignment {
        let tier = if total_points_earned >= GOLD_THRESHOLD {
            LoyaltyTier::Gold
        } else if total_points_earned >= SILVER_THRESHOLD {
            LoyaltyTier::Silver
        } else {
            LoyaltyTier::Bronze
        };

        TierAssignment {
            tier,
            multiplier: tier.multiplier(),
        }
    }

    /// Compare the classification of `total_points_earned` with `current`.
    ///
    /// `promoted` only reports a change of classification; the caller decides
    /// whether to persist it and notify.
    pub fn check_promotion(total_points_earned: i64, current: LoyaltyTier) -> PromotionCheck {
        let assignment = Self::classify(total_points_earned);
        PromotionCheck {
            tier: assignment.tier,
            multiplier: assignment.multiplier,
            promoted: assignment.tier != current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(TierClassifier::classify(0).tier, LoyaltyTier::Bronze);
        assert_eq!(TierClassifier::classify(9_999).tier, LoyaltyTier::Bronze);
        assert_eq!(TierClassifier::classify(10_000).tier, LoyaltyTier::Silver);
        assert_eq!(TierClassifier::classify(49_999).tier, LoyaltyTier::Silver);
        assert_eq!(TierClassifier::classify(50_000).tier, LoyaltyTier::Gold);
        assert_eq!(TierClassifier::classify(i64::MAX).tier, LoyaltyTier::Gold);
    }

    #[test]
    fn test_classify_multipliers() {
        assert_eq!(TierClassifier::classify(5).multiplier, dec!(1.00));
        assert_eq!(TierClassifier::classify(10_000).multiplier, dec!(1.25));
        assert_eq!(TierClassifier::classify(50_000).multiplier, dec!(1.50));
    }

    #[test]
    fn test_promotion_at_silver_threshold() {
        let check = TierClassifier::check_promotion(10_000, LoyaltyTier::Bronze);
        assert_eq!(check.tier, LoyaltyTier::Silver);
        assert_eq!(check.multiplier, dec!(1.25));
        assert!(check.promoted);
    }

    #[test]
    fn test_no_promotion_within_tier() {
        let check = TierClassifier::check_promotion(12_000, LoyaltyTier::Silver);
        assert_eq!(check.tier, LoyaltyTier::Silver);
        assert!(!check.promoted);
    }

    #[test]
    fn test_check_compares_classifications_only() {
        // A stored tier above the classification still reports a change.
        let check = TierClassifier::check_promotion(100, LoyaltyTier::Gold);
        assert_eq!(check.tier, LoyaltyTier::Bronze);
        assert!(check.promoted);
    }

    #[test]
    fn test_skip_straight_to_gold() {
        let check = TierClassifier::check_promotion(60_000, LoyaltyTier::Bronze);
        assert_eq!(check.tier, LoyaltyTier::Gold);
        assert!(check.promoted);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn tier_strategy() -> impl Strategy<Value = LoyaltyTier> {
        prop_oneof![
            Just(LoyaltyTier::Bronze),
            Just(LoyaltyTier::Silver),
            Just(LoyaltyTier::Gold),
        ]
    }

    /// More lifetime points never classify into a lower tier
    #[test]
    fn prop_classification_is_monotonic() {
        proptest!(|(a in 0i64..=200_000, b in 0i64..=200_000)| {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(TierClassifier::classify(low).tier <= TierClassifier::classify(high).tier);
        });
    }

    /// `promoted` is exactly "classification differs from current tier"
    #[test]
    fn prop_promoted_iff_tier_changes() {
        proptest!(|(total in 0i64..=200_000, current in tier_strategy())| {
            let check = TierClassifier::check_promotion(total, current);
            prop_assert_eq!(check.promoted, check.tier != current);
            prop_assert_eq!(check.multiplier, check.tier.multiplier());
        });
    }
}
