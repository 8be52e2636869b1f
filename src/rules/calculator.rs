use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

use crate::receipts::{LineItem, PricedLineItem};
use crate::rules::BrandRule;

/// Invalid pricing input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error("Line total must not be negative: {0}")]
    NegativeAmount(Decimal),

    #[error("Tier multiplier must be positive: {0}")]
    NonPositiveMultiplier(Decimal),

    #[error("Points overflow for brand {brand_id}")]
    Overflow { brand_id: i64 },
}

/// Points priced for a whole receipt
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptPoints {
    pub total_points: i64,
    pub priced_items: Vec<PricedLineItem>,
}

/// Service for pricing receipt line items into loyalty points
pub struct PointsCalculator;

impl PointsCalculator {
    /// Calculate the points earned by one line item
    ///
    /// Inactive brands and line totals under the brand minimum earn nothing.
    /// Otherwise the base points `floor(line_total * rate)` are scaled by the
    /// tier multiplier, floored again and capped at the brand's per-item maximum.
    ///
    /// The cap bounds a single line item. A receipt carrying several lines of
    /// the same brand can exceed it in aggregate.
    pub fn calculate_line_item_points(
        rule: &BrandRule,
        line_total: Decimal,
        tier_multiplier: Decimal,
    ) -> Result<i64, CalculationError> {
        if line_total.is_sign_negative() && !line_total.is_zero() {
            return Err(CalculationError::NegativeAmount(line_total));
        }
        if tier_multiplier <= Decimal::ZERO {
            return Err(CalculationError::NonPositiveMultiplier(tier_multiplier));
        }

        if !rule.is_active || line_total < rule.min_purchase_amount {
            return Ok(0);
        }

        let overflow = CalculationError::Overflow {
            brand_id: rule.brand_id,
        };
        let base = line_total
            .checked_mul(rule.points_per_unit_currency)
            .ok_or_else(|| overflow.clone())?
            .floor();
        let scaled = base
            .checked_mul(tier_multiplier)
            .ok_or_else(|| overflow.clone())?
            .floor();
        let points = scaled.to_i64().ok_or(overflow)?;

        Ok(points.min(rule.max_points_per_item).max(0))
    }

    /// Price every line item of a receipt and sum the result
    ///
    /// Items whose brand has no rule earn nothing but are still returned so the
    /// receipt keeps its full line-item record.
    pub fn calculate_receipt_points(
        items: &[LineItem],
        rules: &HashMap<i64, BrandRule>,
        tier_multiplier: Decimal,
    ) -> Result<ReceiptPoints, CalculationError> {
        let mut total_points: i64 = 0;
        let mut priced_items = Vec::with_capacity(items.len());

        for item in items {
            let points = match rules.get(&item.brand_id) {
                Some(rule) => {
                    Self::calculate_line_item_points(rule, item.line_total, tier_multiplier)?
                }
                None => {
                    if item.line_total.is_sign_negative() && !item.line_total.is_zero() {
                        return Err(CalculationError::NegativeAmount(item.line_total));
                    }
                    0
                }
            };

            total_points = total_points
                .checked_add(points)
                .ok_or(CalculationError::Overflow {
                    brand_id: item.brand_id,
                })?;
            priced_items.push(PricedLineItem {
                brand_id: item.brand_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
                points_calculated: points,
            });
        }

        Ok(ReceiptPoints {
            total_points,
            priced_items,
        })
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn rule_strategy() -> impl Strategy<Value = BrandRule> {
        (8i64..=15, 50i64..=200, 5000i64..=10_000, any::<bool>()).prop_map(
            |(rate, min, cap, is_active)| BrandRule {
                brand_id: 1,
                name: "brand".to_string(),
                points_per_unit_currency: Decimal::from(rate),
                min_purchase_amount: Decimal::from(min),
                max_points_per_item: cap,
                is_active,
            },
        )
    }

    fn multiplier_strategy() -> impl Strategy<Value = Decimal> {
        prop_oneof![
            Just(Decimal::new(100, 2)),
            Just(Decimal::new(125, 2)),
            Just(Decimal::new(150, 2)),
        ]
    }

    /// Line points never exceed the cap and are never negative
    #[test]
    fn prop_line_points_bounded_by_cap() {
        proptest!(|(
            rule in rule_strategy(),
            cents in 0u64..=10_000_000u64,
            multiplier in multiplier_strategy()
        )| {
            let line_total = Decimal::new(cents as i64, 2);
            let points = PointsCalculator::calculate_line_item_points(&rule, line_total, multiplier).unwrap();
            prop_assert!(points >= 0);
            prop_assert!(points <= rule.max_points_per_item);
            if !rule.is_active || line_total < rule.min_purchase_amount {
                prop_assert_eq!(points, 0);
            }
        });
    }

    /// A higher tier multiplier never earns fewer points
    #[test]
    fn prop_multiplier_is_monotonic() {
        proptest!(|(rule in rule_strategy(), cents in 0u64..=10_000_000u64)| {
            let line_total = Decimal::new(cents as i64, 2);
            let bronze = PointsCalculator::calculate_line_item_points(&rule, line_total, Decimal::new(100, 2)).unwrap();
            let silver = PointsCalculator::calculate_line_item_points(&rule, line_total, Decimal::new(125, 2)).unwrap();
            let gold = PointsCalculator::calculate_line_item_points(&rule, line_total, Decimal::new(150, 2)).unwrap();
            prop_assert!(bronze <= silver);
            prop_assert!(silver <= gold);
        });
    }

    /// The receipt total is the sum of its priced items
    #[test]
    fn prop_receipt_total_is_sum_of_items() {
        proptest!(|(
            rule in rule_strategy(),
            totals in prop::collection::vec(0u64..=100_000u64, 0..=20),
            multiplier in multiplier_strategy()
        )| {
            let rules = HashMap::from([(1, rule)]);
            let items: Vec<LineItem> = totals
                .into_iter()
                .map(|cents| {
                    let line_total = Decimal::new(cents as i64, 2);
                    LineItem { brand_id: 1, quantity: 1, unit_price: line_total, line_total }
                })
                .collect();

            let result = PointsCalculator::calculate_receipt_points(&items, &rules, multiplier).unwrap();
            let sum: i64 = result.priced_items.iter().map(|p| p.points_calculated).sum();
            prop_assert_eq!(result.total_points, sum);
            prop_assert_eq!(result.priced_items.len(), items.len());
        });
    }
}
