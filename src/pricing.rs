use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use utoipa::ToSchema;

/// GST applied on goods value plus making charges. Fixed rate, not
/// configurable per product.
pub const GST_RATE: Decimal = dec!(0.03);

const SHIPPING_TIER_1_MAX_GRAMS: Decimal = dec!(50_000);
const SHIPPING_TIER_2_MAX_GRAMS: Decimal = dec!(100_000);
const SHIPPING_TIER_1: Decimal = dec!(100);
const SHIPPING_TIER_2: Decimal = dec!(150);
const SHIPPING_TIER_3: Decimal = dec!(200);

/// One cart line with the product figures it was priced against.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub unit_price: Decimal,
    pub making_charge: Decimal,
    pub quantity: i32,
    pub weight_grams: Decimal,
}

/// The order pricing block. Computed once at checkout and never recomputed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Pricing {
    pub subtotal: Decimal,
    pub making_charges: Decimal,
    pub gst: Decimal,
    pub shipping_charges: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
}

/// Round a monetary value to 2 decimal places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Shipping is a step function of total order weight.
pub fn shipping_for_weight(total_grams: Decimal) -> Decimal {
    if total_grams <= SHIPPING_TIER_1_MAX_GRAMS {
        SHIPPING_TIER_1
    } else if total_grams <= SHIPPING_TIER_2_MAX_GRAMS {
        SHIPPING_TIER_2
    } else {
        SHIPPING_TIER_3
    }
}

/// Compute the pricing block for a set of lines, before any coupon discount.
pub fn quote(lines: &[PricedLine]) -> Pricing {
    let mut subtotal = Decimal::ZERO;
    let mut making_charges = Decimal::ZERO;
    let mut total_grams = Decimal::ZERO;

    for line in lines {
        let qty = Decimal::from(line.quantity);
        subtotal += line.unit_price * qty;
        making_charges += line.making_charge * qty;
        total_grams += line.weight_grams * qty;
    }

    let subtotal = round_money(subtotal);
    let making_charges = round_money(making_charges);
    let gst = round_money((subtotal + making_charges) * GST_RATE);
    let shipping_charges = shipping_for_weight(total_grams);
    let total_amount = round_money(subtotal + making_charges + gst + shipping_charges);

    Pricing {
        subtotal,
        making_charges,
        gst,
        shipping_charges,
        discount: Decimal::ZERO,
        total_amount,
    }
}

impl Pricing {
    /// Total before any discount is subtracted.
    pub fn pre_discount_total(&self) -> Decimal {
        round_money(self.subtotal + self.making_charges + self.gst + self.shipping_charges)
    }

    /// Apply a coupon discount, clamped to the pre-discount total.
    pub fn with_discount(mut self, discount: Decimal) -> Self {
        let discount = round_money(discount.max(Decimal::ZERO).min(self.pre_discount_total()));
        self.total_amount = round_money(self.pre_discount_total() - discount);
        self.discount = discount;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(unit_price: Decimal, making: Decimal, qty: i32, grams: Decimal) -> PricedLine {
        PricedLine {
            unit_price,
            making_charge: making,
            quantity: qty,
            weight_grams: grams,
        }
    }

    #[test]
    fn quote_matches_worked_example() {
        // 2 x 1000 with 50/unit making and 10kg/unit weight:
        // subtotal 2000, making 100, gst 3% of 2100 = 63, shipping 100, total 2263.
        let pricing = quote(&[line(dec!(1000), dec!(50), 2, dec!(10_000))]);
        assert_eq!(pricing.subtotal, dec!(2000.00));
        assert_eq!(pricing.making_charges, dec!(100.00));
        assert_eq!(pricing.gst, dec!(63.00));
        assert_eq!(pricing.shipping_charges, dec!(100));
        assert_eq!(pricing.discount, dec!(0));
        assert_eq!(pricing.total_amount, dec!(2263.00));
    }

    #[test]
    fn gst_rounds_half_away_from_zero() {
        // subtotal 101.75, gst = 3.0525 -> 3.05; subtotal 100.85, gst = 3.0255 -> 3.03
        let pricing = quote(&[line(dec!(101.75), dec!(0), 1, dec!(100))]);
        assert_eq!(pricing.gst, dec!(3.05));

        let pricing = quote(&[line(dec!(100.85), dec!(0), 1, dec!(100))]);
        assert_eq!(pricing.gst, dec!(3.03));
    }

    #[test]
    fn shipping_steps_on_weight_boundaries() {
        assert_eq!(shipping_for_weight(dec!(0)), dec!(100));
        assert_eq!(shipping_for_weight(dec!(50_000)), dec!(100));
        assert_eq!(shipping_for_weight(dec!(50_000.01)), dec!(150));
        assert_eq!(shipping_for_weight(dec!(100_000)), dec!(150));
        assert_eq!(shipping_for_weight(dec!(100_000.01)), dec!(200));
    }

    #[test]
    fn discount_is_clamped_to_pre_discount_total() {
        let pricing = quote(&[line(dec!(1000), dec!(50), 2, dec!(10_000))]);
        let discounted = pricing.clone().with_discount(dec!(263));
        assert_eq!(discounted.total_amount, dec!(2000.00));
        assert_eq!(discounted.discount, dec!(263.00));

        let over = pricing.with_discount(dec!(99_999));
        assert_eq!(over.total_amount, dec!(0.00));
        assert_eq!(over.discount, dec!(2263.00));
    }

    #[test]
    fn multi_line_quote_sums_lines() {
        let pricing = quote(&[
            line(dec!(500), dec!(25), 1, dec!(30_000)),
            line(dec!(250.50), dec!(10), 2, dec!(15_000)),
        ]);
        // subtotal 500 + 501 = 1001, making 25 + 20 = 45, weight 60kg -> 150
        assert_eq!(pricing.subtotal, dec!(1001.00));
        assert_eq!(pricing.making_charges, dec!(45.00));
        assert_eq!(pricing.gst, dec!(31.38));
        assert_eq!(pricing.shipping_charges, dec!(150));
        assert_eq!(pricing.total_amount, dec!(1227.38));
    }
}
