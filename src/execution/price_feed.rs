use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::Ticker;
use crate::Result;

/// Market-data source consulted by the coordinator
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Latest traded price for `symbol`
    async fn latest_price(&self, symbol: &str) -> Result<f64>;

    /// Latest price plus 24h change
    async fn ticker(&self, symbol: &str) -> Result<Ticker>;
}

/// Prices fetched during one sweep
///
/// Each symbol hits the oracle at most once per sweep. A failed lookup is
/// remembered as `0.0`, which the trigger evaluator treats as "no price".
pub struct PriceBook {
    oracle: Arc<dyn PriceOracle>,
    prices: HashMap<String, f64>,
}

impl PriceBook {
    pub fn new(oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            oracle,
            prices: HashMap::new(),
        }
    }

    pub async fn price(&mut self, symbol: &str) -> f64 {
        if let Some(&price) = self.prices.get(symbol) {
            return price;
        }

        let price = match self.oracle.latest_price(symbol).await {
            Ok(price) => {
                tracing::debug!(symbol, price, "Fetched price");
                price
            }
            Err(e) => {
                tracing::warn!(symbol, "Price lookup failed: {}", e);
                0.0
            }
        };

        self.prices.insert(symbol.to_string(), price);
        price
    }
}
