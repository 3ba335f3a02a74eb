use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::Result;

/// Order direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of conditional order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    StopLoss,
    TakeProfit,
    StopMarket,
    StopLimit,
    TrailingStop,
}

impl OrderType {
    pub const ALL: [OrderType; 5] = [
        OrderType::StopLoss,
        OrderType::TakeProfit,
        OrderType::StopMarket,
        OrderType::StopLimit,
        OrderType::TrailingStop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::TrailingStop => "TRAILING_STOP",
        }
    }

    /// Limit-style types carry an `order_price`
    pub fn is_limit(&self) -> bool {
        matches!(self, OrderType::StopLimit)
    }

    /// Order type sent to the exchange once the trigger fires
    pub fn exchange_order_type(&self) -> &'static str {
        if self.is_limit() {
            "LIMIT"
        } else {
            "MARKET"
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a conditional order
///
/// ```text
/// PENDING -> TRIGGERED -> EXECUTED
///    |           \-----> FAILED
///    \-> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Triggered,
    Executed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Triggered => "TRIGGERED",
            OrderStatus::Executed => "EXECUTED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// PENDING or TRIGGERED
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Triggered)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Triggered) | (Pending, Cancelled) | (Triggered, Executed) | (Triggered, Failed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Futures margin mode applied before submission
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginType {
    Isolated,
    Crossed,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Crossed => "CROSSED",
        }
    }
}

fn normalize_name(raw: &str) -> String {
    raw.trim().to_uppercase().replace('-', "_")
}

impl FromStr for OrderSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize_name(s).as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(Error::Validation(format!("unknown side '{}'", s))),
        }
    }
}

impl FromStr for OrderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = normalize_name(s);
        OrderType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| Error::Validation(format!("unknown order type '{}'", s)))
    }
}

impl FromStr for MarginType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize_name(s).as_str() {
            "ISOLATED" => Ok(MarginType::Isolated),
            "CROSSED" | "CROSS" => Ok(MarginType::Crossed),
            _ => Err(Error::Validation(format!("unknown margin type '{}'", s))),
        }
    }
}

/// A price-activated trading rule held locally until it fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOrder {
    pub id: u64,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    pub trigger_price: f64,
    #[serde(default)]
    pub order_price: Option<f64>,
    pub status: OrderStatus,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub trigger_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execute_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    #[serde(default)]
    pub remark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_type: Option<MarginType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

impl ConditionalOrder {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// User input for a new conditional order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    pub trigger_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_price: Option<f64>,
    #[serde(default)]
    pub remark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_type: Option<MarginType>,
}

impl OrderDraft {
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        trigger_price: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            trigger_price,
            order_price: None,
            remark: String::new(),
            leverage: None,
            margin_type: None,
        }
    }

    pub fn with_order_price(mut self, price: f64) -> Self {
        self.order_price = Some(price);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Validation("symbol must not be empty".to_string()));
        }
        ensure_positive("quantity", self.quantity)?;
        ensure_positive("trigger price", self.trigger_price)?;

        match (self.order_type.is_limit(), self.order_price) {
            (true, None) => {
                return Err(Error::Validation(format!(
                    "{} requires an order price",
                    self.order_type
                )))
            }
            (_, Some(price)) => ensure_positive("order price", price)?,
            (false, None) => {}
        }

        if let Some(leverage) = self.leverage {
            if !(1..=125).contains(&leverage) {
                return Err(Error::Validation(format!(
                    "leverage must be between 1 and 125, got {}",
                    leverage
                )));
            }
        }

        Ok(())
    }
}

/// Partial update applied through `TriggerStore::update_fields`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl OrderPatch {
    /// True when the patch changes anything besides display fields
    pub fn touches_execution_fields(&self) -> bool {
        self.quantity.is_some() || self.trigger_price.is_some() || self.order_price.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(q) = self.quantity {
            ensure_positive("quantity", q)?;
        }
        if let Some(p) = self.trigger_price {
            ensure_positive("trigger price", p)?;
        }
        if let Some(p) = self.order_price {
            ensure_positive("order price", p)?;
        }
        Ok(())
    }
}

/// Largest quantity or price accepted on a record
pub const MAX_ORDER_VALUE: f64 = 1e15;

fn ensure_positive(field: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::Validation(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    if value > MAX_ORDER_VALUE {
        return Err(Error::Validation(format!(
            "{} {} exceeds {}",
            field, value, MAX_ORDER_VALUE
        )));
    }
    Ok(())
}

/// Exchange trading constraints for one symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRule {
    pub symbol: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub min_qty: f64,
    pub max_qty: f64,
    pub step_size: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub tick_size: f64,
    pub min_notional: f64,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SymbolRule {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// All numeric bounds must be finite and non-negative
    pub fn check_bounds(&self) -> Result<()> {
        let bounds = [
            ("minQty", self.min_qty),
            ("maxQty", self.max_qty),
            ("stepSize", self.step_size),
            ("minPrice", self.min_price),
            ("maxPrice", self.max_price),
            ("tickSize", self.tick_size),
            ("minNotional", self.min_notional),
        ];

        for (field, value) in bounds {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Validation(format!(
                    "{} has invalid {} {}",
                    self.symbol, field, value
                )));
            }
        }
        Ok(())
    }
}

/// Latest price plus 24h change for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: f64,
    pub price_change_percent: f64,
    pub timestamp: DateTime<Utc>,
}
