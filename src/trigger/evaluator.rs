use crate::models::{OrderSide, OrderType};

/// Decide whether a conditional order fires at `current_price`
///
/// Stop-family types (including trailing stops, which use `trigger_price` as
/// their activation level) protect against adverse moves: a SELL stop fires
/// at or below the trigger, a BUY stop at or above it. Take-profit is the
/// mirror image. Boundaries are inclusive.
///
/// A non-positive or non-finite `current_price` means the price is unknown and
/// never fires.
pub fn should_fire(
    order_type: OrderType,
    side: OrderSide,
    trigger_price: f64,
    current_price: f64,
) -> bool {
    if !current_price.is_finite() || current_price <= 0.0 {
        return false;
    }

    match (order_type, side) {
        (
            OrderType::StopLoss
            | OrderType::StopMarket
            | OrderType::StopLimit
            | OrderType::TrailingStop,
            OrderSide::Sell,
        ) => current_price <= trigger_price,
        (
            OrderType::StopLoss
            | OrderType::StopMarket
            | OrderType::StopLimit
            | OrderType::TrailingStop,
            OrderSide::Buy,
        ) => current_price >= trigger_price,
        (OrderType::TakeProfit, OrderSide::Sell) => current_price >= trigger_price,
        (OrderType::TakeProfit, OrderSide::Buy) => current_price <= trigger_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOPS: [OrderType; 4] = [
        OrderType::StopLoss,
        OrderType::StopMarket,
        OrderType::StopLimit,
        OrderType::TrailingStop,
    ];

    #[test]
    fn test_stop_loss_sell_boundary_fires() {
        assert!(should_fire(OrderType::StopLoss, OrderSide::Sell, 100.0, 100.0));
    }

    #[test]
    fn test_stop_loss_sell_above_trigger_holds() {
        assert!(!should_fire(OrderType::StopLoss, OrderSide::Sell, 100.0, 101.0));
    }

    #[test]
    fn test_take_profit_buy() {
        assert!(should_fire(OrderType::TakeProfit, OrderSide::Buy, 50.0, 49.0));
        assert!(!should_fire(OrderType::TakeProfit, OrderSide::Buy, 50.0, 51.0));
    }

    #[test]
    fn test_take_profit_sell() {
        assert!(should_fire(OrderType::TakeProfit, OrderSide::Sell, 50.0, 50.0));
        assert!(should_fire(OrderType::TakeProfit, OrderSide::Sell, 50.0, 60.0));
        assert!(!should_fire(OrderType::TakeProfit, OrderSide::Sell, 50.0, 49.9));
    }

    #[test]
    fn test_stop_family_decision_table() {
        for order_type in STOPS {
            assert!(should_fire(order_type, OrderSide::Sell, 100.0, 99.0));
            assert!(!should_fire(order_type, OrderSide::Sell, 100.0, 100.5));
            assert!(should_fire(order_type, OrderSide::Buy, 100.0, 100.0));
            assert!(should_fire(order_type, OrderSide::Buy, 100.0, 120.0));
            assert!(!should_fire(order_type, OrderSide::Buy, 100.0, 99.0));
        }
    }

    #[test]
    fn test_missing_price_never_fires() {
        for order_type in OrderType::ALL {
            for side in [OrderSide::Buy, OrderSide::Sell] {
                assert!(!should_fire(order_type, side, 100.0, 0.0));
                assert!(!should_fire(order_type, side, 100.0, -1.0));
                assert!(!should_fire(order_type, side, 100.0, f64::NAN));
            }
        }
    }

    #[test]
    fn test_deterministic() {
        for order_type in OrderType::ALL {
            for side in [OrderSide::Buy, OrderSide::Sell] {
                for price in [0.0, 49.0, 50.0, 51.0] {
                    assert_eq!(
                        should_fire(order_type, side, 50.0, price),
                        should_fire(order_type, side, 50.0, price)
                    );
                }
            }
        }
    }
}
