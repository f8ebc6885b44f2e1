//! Tax and totals calculator.
//!
//! Pure functions over `Decimal`. Every computed field is rounded to cents,
//! half away from zero, so recomputing from the same lines is stable.

use crate::error::{DocumentError, DocumentResult};
use crate::models::{DocumentTotals, HeaderAdjustments, LineDiscount, LineItem, VatCategory};
use rust_decimal::{Decimal, RoundingStrategy};

pub const MONEY_SCALE: u32 = 2;

/// Amounts computed for a single line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineAmounts {
    pub discount_amount: Decimal,
    pub vat_rate: Decimal,
    pub net_amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
}

pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

fn percent_of(value: Decimal, rate: Decimal) -> Decimal {
    round_money(value * rate / Decimal::ONE_HUNDRED)
}

pub fn compute_line(
    quantity: Decimal,
    unit_price: Decimal,
    discount: &LineDiscount,
    vat_category: VatCategory,
) -> DocumentResult<LineAmounts> {
    if quantity <= Decimal::ZERO {
        return Err(DocumentError::Validation(format!(
            "quantity must be greater than zero, got {}",
            quantity
        )));
    }
    if unit_price < Decimal::ZERO {
        return Err(DocumentError::Validation(format!(
            "unit price must not be negative, got {}",
            unit_price
        )));
    }

    let gross = quantity * unit_price;
    let discount_amount = match *discount {
        LineDiscount::None => Decimal::ZERO,
        LineDiscount::Percent(pct) => {
            if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                return Err(DocumentError::Validation(format!(
                    "discount percentage must be between 0 and 100, got {}",
                    pct
                )));
            }
            percent_of(gross, pct)
        }
        LineDiscount::Amount(amount) => {
            if amount < Decimal::ZERO {
                return Err(DocumentError::Validation(format!(
                    "discount amount must not be negative, got {}",
                    amount
                )));
            }
            round_money(amount)
        }
    };

    if discount_amount > round_money(gross) {
        return Err(DocumentError::Validation(format!(
            "discount {} exceeds line amount {}",
            discount_amount,
            round_money(gross)
        )));
    }

    let vat_rate = vat_category.rate();
    let net_amount = round_money(gross - discount_amount);
    let vat_amount = percent_of(net_amount, vat_rate);

    Ok(LineAmounts {
        discount_amount,
        vat_rate,
        net_amount,
        vat_amount,
        total_amount: net_amount + vat_amount,
    })
}

pub fn validate_adjustments(adjustments: &HeaderAdjustments) -> DocumentResult<()> {
    if adjustments.discount_amount < Decimal::ZERO {
        return Err(DocumentError::Validation(
            "header discount must not be negative".to_string(),
        ));
    }
    if adjustments.other_charges < Decimal::ZERO {
        return Err(DocumentError::Validation(
            "other charges must not be negative".to_string(),
        ));
    }
    if let Some(rate) = adjustments.withholding_rate {
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(DocumentError::Validation(format!(
                "withholding rate must be between 0 and 100, got {}",
                rate
            )));
        }
    }
    Ok(())
}

/// Roll up header totals from the full set of current lines.
pub fn compute_totals(
    lines: &[LineItem],
    adjustments: &HeaderAdjustments,
) -> DocumentResult<DocumentTotals> {
    validate_adjustments(adjustments)?;

    let subtotal = round_money(lines.iter().map(|l| l.net_amount).sum());
    let vat_amount = round_money(lines.iter().map(|l| l.vat_amount).sum());
    let discount_amount = round_money(adjustments.discount_amount);
    let other_charges = round_money(adjustments.other_charges);

    if discount_amount > subtotal {
        return Err(DocumentError::Validation(format!(
            "header discount {} exceeds subtotal {}",
            discount_amount, subtotal
        )));
    }

    let withholding_amount = match adjustments.withholding_rate {
        Some(rate) => percent_of(subtotal - discount_amount, rate),
        None => round_money(Decimal::ZERO),
    };

    let total = subtotal - discount_amount + vat_amount - withholding_amount + other_charges;
    if total < Decimal::ZERO {
        return Err(DocumentError::Validation(format!(
            "document total would be negative ({})",
            total
        )));
    }

    Ok(DocumentTotals {
        subtotal,
        discount_amount,
        vat_amount,
        withholding_amount,
        other_charges,
        total: round_money(total),
    })
}

pub fn balance_due(total: Decimal, paid: Decimal) -> Decimal {
    round_money((total - paid).max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn line(quantity: Decimal, price: Decimal, category: VatCategory) -> LineItem {
        let amounts = compute_line(quantity, price, &LineDiscount::None, category).unwrap();
        LineItem {
            line_id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            line_number: 1,
            description: "item".to_string(),
            quantity,
            unit: "pcs".to_string(),
            unit_price: price,
            discount: LineDiscount::None,
            discount_amount: amounts.discount_amount,
            vat_category: category,
            vat_rate: amounts.vat_rate,
            net_amount: amounts.net_amount,
            vat_amount: amounts.vat_amount,
            total_amount: amounts.total_amount,
            income_classification: None,
        }
    }

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(dec!(0.125)), dec!(0.13));
        assert_eq!(round_money(dec!(0.124)), dec!(0.12));
        assert_eq!(round_money(dec!(-0.125)), dec!(-0.13));
        assert_eq!(round_money(dec!(35)).to_string(), "35.00");
    }

    #[test]
    fn test_two_line_rollup() {
        let lines = vec![
            line(dec!(3), dec!(10.00), VatCategory::Normal),
            line(dec!(1), dec!(5.00), VatCategory::Reduced),
        ];
        assert_eq!(lines[0].vat_amount, dec!(7.20));
        assert_eq!(lines[1].vat_amount, dec!(0.65));

        let totals = compute_totals(&lines, &HeaderAdjustments::default()).unwrap();
        assert_eq!(totals.subtotal, dec!(35.00));
        assert_eq!(totals.vat_amount, dec!(7.85));
        assert_eq!(totals.total, dec!(42.85));
    }

    #[test]
    fn test_rollup_is_idempotent() {
        let lines = vec![
            line(dec!(2.5), dec!(3.333), VatCategory::SuperReduced),
            line(dec!(7), dec!(0.99), VatCategory::Normal),
        ];
        let adjustments = HeaderAdjustments {
            discount_amount: dec!(1.10),
            withholding_rate: Some(dec!(20)),
            other_charges: dec!(0.50),
        };

        let first = compute_totals(&lines, &adjustments).unwrap();
        let second = compute_totals(&lines, &adjustments).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_percent_discount_and_withholding() {
        let amounts = compute_line(
            dec!(4),
            dec!(25.00),
            &LineDiscount::Percent(dec!(10)),
            VatCategory::Normal,
        )
        .unwrap();
        assert_eq!(amounts.discount_amount, dec!(10.00));
        assert_eq!(amounts.net_amount, dec!(90.00));
        assert_eq!(amounts.vat_amount, dec!(21.60));
        assert_eq!(amounts.total_amount, dec!(111.60));

        let mut item = line(dec!(4), dec!(25.00), VatCategory::Normal);
        item.net_amount = amounts.net_amount;
        item.vat_amount = amounts.vat_amount;
        let totals = compute_totals(
            &[item],
            &HeaderAdjustments {
                discount_amount: dec!(10.00),
                withholding_rate: Some(dec!(20)),
                other_charges: dec!(2.00),
            },
        )
        .unwrap();
        assert_eq!(totals.withholding_amount, dec!(16.00));
        // 90 - 10 + 21.60 - 16 + 2
        assert_eq!(totals.total, dec!(87.60));
    }

    #[test]
    fn test_zero_rated_categories_carry_no_vat() {
        for category in [VatCategory::Exempt, VatCategory::ReverseCharge] {
            let amounts = compute_line(dec!(1), dec!(100), &LineDiscount::None, category).unwrap();
            assert_eq!(amounts.vat_amount, dec!(0.00));
            assert_eq!(amounts.total_amount, dec!(100.00));
        }
    }

    #[test]
    fn test_line_validation() {
        assert!(matches!(
            compute_line(dec!(0), dec!(1), &LineDiscount::None, VatCategory::Normal),
            Err(DocumentError::Validation(_))
        ));
        assert!(matches!(
            compute_line(dec!(-1), dec!(1), &LineDiscount::None, VatCategory::Normal),
            Err(DocumentError::Validation(_))
        ));
        assert!(matches!(
            compute_line(dec!(1), dec!(-0.01), &LineDiscount::None, VatCategory::Normal),
            Err(DocumentError::Validation(_))
        ));
        assert!(matches!(
            compute_line(
                dec!(1),
                dec!(10),
                &LineDiscount::Amount(dec!(10.01)),
                VatCategory::Normal
            ),
            Err(DocumentError::Validation(_))
        ));
        assert!(matches!(
            compute_line(
                dec!(1),
                dec!(10),
                &LineDiscount::Percent(dec!(101)),
                VatCategory::Normal
            ),
            Err(DocumentError::Validation(_))
        ));
    }

    #[test]
    fn test_header_discount_cannot_exceed_subtotal() {
        let lines = vec![line(dec!(1), dec!(5), VatCategory::Normal)];
        let result = compute_totals(
            &lines,
            &HeaderAdjustments {
                discount_amount: dec!(6),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DocumentError::Validation(_))));
    }

    #[test]
    fn test_balance_due_never_negative() {
        assert_eq!(balance_due(dec!(42.85), dec!(40)), dec!(2.85));
        assert_eq!(balance_due(dec!(42.85), dec!(42.85)), dec!(0.00));
        assert_eq!(balance_due(dec!(10), dec!(12)), dec!(0.00));
    }

    #[test]
    fn test_empty_document_totals_are_zero() {
        let totals = compute_totals(&[], &HeaderAdjustments::default()).unwrap();
        assert_eq!(totals.total, dec!(0.00));
        assert_eq!(totals.subtotal, dec!(0.00));
    }
}
