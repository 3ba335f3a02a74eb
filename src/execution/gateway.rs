use async_trait::async_trait;

use super::precision::{adjust_price, adjust_quantity, check_notional, format_decimal};
use crate::error::Error;
use crate::models::{ConditionalOrder, MarginType, OrderSide, SymbolRule};
use crate::Result;

/// Exchange-ready order with quantity and price already snapped to the
/// symbol's rules
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedOrder {
    pub record_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    /// `MARKET` or `LIMIT`
    pub order_type: &'static str,
    pub quantity: String,
    pub price: Option<String>,
    pub client_order_id: String,
    pub leverage: Option<u32>,
    pub margin_type: Option<MarginType>,
}

impl PreparedOrder {
    /// Apply LOT_SIZE / PRICE_FILTER / MIN_NOTIONAL to a fired record
    ///
    /// `current_price` is the notional reference for market orders.
    pub fn build(order: &ConditionalOrder, rule: &SymbolRule, current_price: f64) -> Result<Self> {
        let quantity = adjust_quantity(order.quantity, rule)?;

        let price = if order.order_type.is_limit() {
            let raw = order.order_price.ok_or_else(|| {
                Error::Validation(format!("order {} has no limit price", order.id))
            })?;
            Some(adjust_price(raw, rule)?)
        } else {
            None
        };

        check_notional(quantity, price.unwrap_or(current_price), rule)?;

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Ok(Self {
            record_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type.exchange_order_type(),
            quantity: format_decimal(quantity, rule.quantity_precision)?,
            price: price
                .map(|p| format_decimal(p, rule.price_precision))
                .transpose()?,
            client_order_id: format!("te-{}-{}", order.id, &nonce[..8]),
            leverage: order.leverage,
            margin_type: order.margin_type,
        })
    }
}

/// Where fired orders are sent
///
/// Implementations do not retry; any error is final for that attempt.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Place the order, returning the exchange's order id
    async fn submit(&self, order: &PreparedOrder) -> Result<String>;

    async fn cancel(&self, symbol: &str, exchange_order_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, OrderType};
    use chrono::Utc;

    fn rule() -> SymbolRule {
        SymbolRule {
            symbol: "BTCUSDT".to_string(),
            price_precision: 1,
            quantity_precision: 3,
            min_qty: 0.001,
            max_qty: 100.0,
            step_size: 0.001,
            min_price: 0.0,
            max_price: 0.0,
            tick_size: 0.1,
            min_notional: 100.0,
            fetched_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    fn record(order_type: OrderType, quantity: f64, order_price: Option<f64>) -> ConditionalOrder {
        ConditionalOrder {
            id: 12,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            order_type,
            quantity,
            trigger_price: 60000.0,
            order_price,
            status: OrderStatus::Triggered,
            create_time: Utc::now(),
            trigger_time: Some(Utc::now()),
            execute_time: None,
            exchange_order_id: None,
            remark: String::new(),
            leverage: Some(10),
            margin_type: None,
            fail_reason: None,
        }
    }

    #[test]
    fn test_market_order_is_adjusted() {
        let prepared =
            PreparedOrder::build(&record(OrderType::StopLoss, 0.01234, None), &rule(), 60000.0)
                .unwrap();

        assert_eq!(prepared.order_type, "MARKET");
        assert_eq!(prepared.quantity, "0.012");
        assert_eq!(prepared.price, None);
        assert_eq!(prepared.leverage, Some(10));
        assert!(prepared.client_order_id.starts_with("te-12-"));
        assert_eq!(prepared.client_order_id.len(), "te-12-".len() + 8);
    }

    #[test]
    fn test_limit_order_uses_tick_rounded_price() {
        let prepared = PreparedOrder::build(
            &record(OrderType::StopLimit, 0.01, Some(59999.97)),
            &rule(),
            60000.0,
        )
        .unwrap();

        assert_eq!(prepared.order_type, "LIMIT");
        assert_eq!(prepared.price.as_deref(), Some("60000"));
    }

    #[test]
    fn test_below_min_notional_is_refused() {
        let result =
            PreparedOrder::build(&record(OrderType::StopMarket, 0.001, None), &rule(), 50000.0);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
