// Domain types shared by the calculator, the tier classifier and the ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Loyalty tier derived from a shopper's lifetime points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoyaltyTier {
    Bronze,
    Silver,
    Gold,
}

impl LoyaltyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyTier::Bronze => "bronze",
            LoyaltyTier::Silver => "silver",
            LoyaltyTier::Gold => "gold",
        }
    }

    /// Points multiplier applied to receipts priced at this tier
    pub fn multiplier(&self) -> Decimal {
        match self {
            LoyaltyTier::Bronze => Decimal::new(100, 2),
            LoyaltyTier::Silver => Decimal::new(125, 2),
            LoyaltyTier::Gold => Decimal::new(150, 2),
        }
    }
}

impl Default for LoyaltyTier {
    fn default() -> Self {
        LoyaltyTier::Bronze
    }
}

impl fmt::Display for LoyaltyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoyaltyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bronze" => Ok(LoyaltyTier::Bronze),
            "silver" => Ok(LoyaltyTier::Silver),
            "gold" => Ok(LoyaltyTier::Gold),
            _ => Err(format!("Invalid loyalty tier: {}", s)),
        }
    }
}

/// Points rule for one merchandise brand.
///
/// Owned by brand administration; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BrandRule {
    pub brand_id: i64,
    pub name: String,
    /// Points earned per unit of currency spent on the brand
    pub points_per_unit_currency: Decimal,
    /// Line totals below this earn nothing
    pub min_purchase_amount: Decimal,
    /// Upper bound on the points one line item can earn
    pub max_points_per_item: i64,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn test_tier_multipliers() {
        assert_eq!(LoyaltyTier::Bronze.multiplier(), dec!(1.00));
        assert_eq!(LoyaltyTier::Silver.multiplier(), dec!(1.25));
        assert_eq!(LoyaltyTier::Gold.multiplier(), dec!(1.50));
    }

    #[test]
    fn test_tier_round_trips_through_text() {
        for tier in [LoyaltyTier::Bronze, LoyaltyTier::Silver, LoyaltyTier::Gold] {
            assert_eq!(LoyaltyTier::from_str(tier.as_str()).unwrap(), tier);
        }
        assert_eq!(LoyaltyTier::from_str("GOLD").unwrap(), LoyaltyTier::Gold);
        assert!(LoyaltyTier::from_str("platinum").is_err());
    }

    #[test]
    fn test_tier_ordering() {
        assert!(LoyaltyTier::Bronze < LoyaltyTier::Silver);
        assert!(LoyaltyTier::Silver < LoyaltyTier::Gold);
        assert_eq!(LoyaltyTier::default(), LoyaltyTier::Bronze);
    }
}
