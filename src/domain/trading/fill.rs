//! Position arithmetic applied when a trade fills.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::trading::types::TradeSide;

/// Quantities at or below this are treated as flat and the position row is
/// removed.
pub const FLAT_TOLERANCE: Decimal = dec!(0.000000001);

/// Post-fill quantity and average cost for an existing position.
///
/// BUY blends the average cost by share-weighted total cost; SELL reduces
/// quantity and leaves the average cost untouched.
pub fn apply_fill_to_position(
    old_quantity: Decimal,
    old_average_cost: Decimal,
    side: TradeSide,
    fill_quantity: Decimal,
    fill_price: Decimal,
) -> (Decimal, Decimal) {
    match side {
        TradeSide::Buy => {
            let new_quantity = old_quantity + fill_quantity;
            let new_average = if new_quantity > Decimal::ZERO {
                (old_quantity * old_average_cost + fill_quantity * fill_price) / new_quantity
            } else {
                old_average_cost
            };
            (new_quantity, new_average)
        }
        TradeSide::Sell => (old_quantity - fill_quantity, old_average_cost),
    }
}

pub fn is_flat(quantity: Decimal) -> bool {
    quantity <= FLAT_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_into_empty_position_takes_fill_price() {
        let (qty, avg) =
            apply_fill_to_position(dec!(0), dec!(0), TradeSide::Buy, dec!(10), dec!(401));
        assert_eq!(qty, dec!(10));
        assert_eq!(avg, dec!(401));
    }

    #[test]
    fn test_buy_blends_average_cost() {
        let (qty, avg) =
            apply_fill_to_position(dec!(10), dec!(100), TradeSide::Buy, dec!(10), dec!(200));
        assert_eq!(qty, dec!(20));
        assert_eq!(avg, dec!(150));
    }

    #[test]
    fn test_sell_keeps_average_cost() {
        let (qty, avg) =
            apply_fill_to_position(dec!(30), dec!(250), TradeSide::Sell, dec!(10), dec!(300));
        assert_eq!(qty, dec!(20));
        assert_eq!(avg, dec!(250));
    }

    #[test]
    fn test_sell_everything_goes_flat() {
        let (qty, _) =
            apply_fill_to_position(dec!(30), dec!(250), TradeSide::Sell, dec!(30), dec!(300));
        assert!(is_flat(qty));
        assert!(is_flat(dec!(0.0000000005)));
        assert!(!is_flat(dec!(0.001)));
    }
}
