use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::signing::{canonical_query, signed_query};
use crate::error::Error;
use crate::execution::{ExchangeGateway, PreparedOrder, PriceOracle, RulesSource};
use crate::models::{MarginType, SymbolRule, Ticker};
use crate::Result;

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

// "No need to change margin type."
const MARGIN_TYPE_UNCHANGED: i64 = -4046;

/// Connection settings for the futures REST API
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Client for the USDⓈ-M futures REST API
///
/// Public endpoints feed prices and symbol rules; signed endpoints place and
/// cancel orders. Nothing here retries.
#[derive(Clone)]
pub struct FuturesClient {
    client: Client,
    config: ClientConfig,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: Option<i64>,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayTicker {
    symbol: String,
    last_price: String,
    price_change_percent: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    // decoded one by one so a single bad entry cannot sink the listing
    symbols: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    price_precision: Option<u32>,
    #[serde(default)]
    quantity_precision: Option<u32>,
    #[serde(default)]
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum RawFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price {
        min_price: String,
        max_price: String,
        tick_size: String,
    },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        min_qty: String,
        max_qty: String,
        step_size: String,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional {
        #[serde(alias = "minNotional")]
        notional: String,
    },
    #[serde(other)]
    Other,
}

/// Acknowledgement for a placed order
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub status: String,
}

/// Resting order as listed by `/openOrders`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub orig_qty: String,
    pub price: String,
    pub status: String,
}

// ============== Helpers ==============

fn parse_num(field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>().map_err(|_| Error::ExchangeRejected {
        code: None,
        msg: format!("invalid {} value '{}'", field, raw),
    })
}

/// Decimal places implied by a step such as "0.00100"
fn decimals_of(step: &str) -> u32 {
    match step.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

impl SymbolInfo {
    fn into_rule(self) -> Result<SymbolRule> {
        let now = Utc::now();
        let mut rule = SymbolRule {
            symbol: self.symbol,
            price_precision: self.price_precision.unwrap_or(0),
            quantity_precision: self.quantity_precision.unwrap_or(0),
            min_qty: 0.0,
            max_qty: 0.0,
            step_size: 0.0,
            min_price: 0.0,
            max_price: 0.0,
            tick_size: 0.0,
            min_notional: 0.0,
            fetched_at: now,
            expires_at: now,
        };

        for filter in self.filters {
            match filter {
                RawFilter::Price {
                    min_price,
                    max_price,
                    tick_size,
                } => {
                    rule.min_price = parse_num("minPrice", &min_price)?;
                    rule.max_price = parse_num("maxPrice", &max_price)?;
                    rule.tick_size = parse_num("tickSize", &tick_size)?;
                    if self.price_precision.is_none() {
                        rule.price_precision = decimals_of(&tick_size);
                    }
                }
                RawFilter::LotSize {
                    min_qty,
                    max_qty,
                    step_size,
                } => {
                    rule.min_qty = parse_num("minQty", &min_qty)?;
                    rule.max_qty = parse_num("maxQty", &max_qty)?;
                    rule.step_size = parse_num("stepSize", &step_size)?;
                    if self.quantity_precision.is_none() {
                        rule.quantity_precision = decimals_of(&step_size);
                    }
                }
                RawFilter::MinNotional { notional } => {
                    rule.min_notional = parse_num("notional", &notional)?;
                }
                RawFilter::Other => {}
            }
        }

        rule.check_bounds()?;
        Ok(rule)
    }
}

// ============== Implementation ==============

impl FuturesClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str, query: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if query.is_empty() {
            format!("{}{}", base, path)
        } else {
            format!("{}{}?{}", base, path, query)
        }
    }

    /// Turn non-2xx responses into `ExchangeRejected`, decode the rest
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorPayload>(&body) {
                Ok(payload) => Error::ExchangeRejected {
                    code: payload.code,
                    msg: payload.msg,
                },
                Err(_) => Error::ExchangeRejected {
                    code: None,
                    msg: format!("HTTP {}: {}", status, body),
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            // some endpoints report errors with a 200 status
            match serde_json::from_str::<ErrorPayload>(&body) {
                Ok(payload) => Error::ExchangeRejected {
                    code: payload.code,
                    msg: payload.msg,
                },
                Err(_) => Error::ExchangeRejected {
                    code: None,
                    msg: format!("unexpected response: {}", e),
                },
            }
        })
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path, &canonical_query(params));
        tracing::debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    /// Send a signed request with all parameters in the query string
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        timestamp_ms: i64,
    ) -> Result<T> {
        if self.config.api_key.is_empty() {
            return Err(Error::Signature("API key is not configured".to_string()));
        }

        let query = signed_query(
            params,
            self.config.recv_window_ms,
            timestamp_ms,
            &self.config.api_secret,
        )?;
        tracing::debug!("{} {} (signed)", method, path);

        let response = self
            .client
            .request(method, self.url(path, &query))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Endpoint: GET /fapi/v1/ticker/price?symbol={symbol}
    pub async fn ticker_price(&self, symbol: &str) -> Result<f64> {
        let ticker: PriceTicker = self
            .public_get("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        parse_num("price", &ticker.price)
    }

    /// Endpoint: GET /fapi/v1/ticker/24hr?symbol={symbol}
    pub async fn ticker_24hr(&self, symbol: &str) -> Result<Ticker> {
        let ticker: DayTicker = self
            .public_get("/fapi/v1/ticker/24hr", &[("symbol", symbol.to_string())])
            .await?;

        Ok(Ticker {
            symbol: ticker.symbol,
            price: parse_num("lastPrice", &ticker.last_price)?,
            price_change_percent: parse_num("priceChangePercent", &ticker.price_change_percent)?,
            timestamp: Utc::now(),
        })
    }

    /// Endpoint: GET /fapi/v1/exchangeInfo
    pub async fn exchange_info(&self) -> Result<Vec<SymbolRule>> {
        let info: ExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        let total = info.symbols.len();

        let rules: Vec<SymbolRule> = info
            .symbols
            .into_iter()
            .filter_map(|raw| {
                let name = raw
                    .get("symbol")
                    .and_then(|s| s.as_str())
                    .unwrap_or("?")
                    .to_string();
                let parsed = serde_json::from_value::<SymbolInfo>(raw)
                    .map_err(|e| Error::ExchangeRejected {
                        code: None,
                        msg: format!("unexpected symbol entry: {}", e),
                    })
                    .and_then(SymbolInfo::into_rule);
                match parsed {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        tracing::warn!(symbol = %name, "Skipping symbol rule: {}", e);
                        None
                    }
                }
            })
            .collect();

        if rules.len() < total {
            tracing::warn!("Parsed {} of {} symbol rules", rules.len(), total);
        }
        Ok(rules)
    }

    /// Endpoint: POST /fapi/v1/order
    pub async fn place_order(&self, order: &PreparedOrder, timestamp_ms: i64) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.to_string()),
            ("quantity", order.quantity.clone()),
        ];
        if let Some(price) = &order.price {
            params.push(("price", price.clone()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        params.push(("newClientOrderId", order.client_order_id.clone()));

        self.signed(Method::POST, "/fapi/v1/order", &params, timestamp_ms)
            .await
    }

    /// Endpoint: DELETE /fapi/v1/order
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        timestamp_ms: i64,
    ) -> Result<OrderAck> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        self.signed(Method::DELETE, "/fapi/v1/order", &params, timestamp_ms)
            .await
    }

    /// Endpoint: GET /fapi/v1/openOrders
    pub async fn open_orders(
        &self,
        symbol: Option<&str>,
        timestamp_ms: i64,
    ) -> Result<Vec<OpenOrder>> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        self.signed(Method::GET, "/fapi/v1/openOrders", &params, timestamp_ms)
            .await
    }

    /// Endpoint: POST /fapi/v1/leverage
    pub async fn set_leverage(&self, symbol: &str, leverage: u32, timestamp_ms: i64) -> Result<()> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let _: serde_json::Value = self
            .signed(Method::POST, "/fapi/v1/leverage", &params, timestamp_ms)
            .await?;
        Ok(())
    }

    /// Endpoint: POST /fapi/v1/marginType
    ///
    /// Asking for the margin type already in effect counts as success.
    pub async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
        timestamp_ms: i64,
    ) -> Result<()> {
        let params = [
            ("symbol", symbol.to_string()),
            ("marginType", margin_type.as_str().to_string()),
        ];
        match self
            .signed::<serde_json::Value>(Method::POST, "/fapi/v1/marginType", &params, timestamp_ms)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::ExchangeRejected {
                code: Some(MARGIN_TYPE_UNCHANGED),
                ..
            }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl ExchangeGateway for FuturesClient {
    async fn submit(&self, order: &PreparedOrder) -> Result<String> {
        if let Some(margin_type) = order.margin_type {
            self.set_margin_type(&order.symbol, margin_type, now_ms())
                .await?;
        }
        if let Some(leverage) = order.leverage {
            self.set_leverage(&order.symbol, leverage, now_ms()).await?;
        }

        let ack = self.place_order(order, now_ms()).await?;
        tracing::info!(
            symbol = %order.symbol,
            order_id = ack.order_id,
            status = %ack.status,
            "Order accepted by exchange"
        );
        Ok(ack.order_id.to_string())
    }

    async fn cancel(&self, symbol: &str, exchange_order_id: &str) -> Result<()> {
        self.cancel_order(symbol, exchange_order_id, now_ms())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PriceOracle for FuturesClient {
    async fn latest_price(&self, symbol: &str) -> Result<f64> {
        self.ticker_price(symbol).await
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ticker_24hr(symbol).await
    }
}

#[async_trait]
impl RulesSource for FuturesClient {
    async fn fetch_rules(&self) -> Result<Vec<SymbolRule>> {
        self.exchange_info().await
    }
}
