use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::gateway::{ExchangeGateway, PreparedOrder};
use super::price_feed::{PriceBook, PriceOracle};
use super::store::TriggerStore;
use super::symbol_rules::SymbolRulesCache;
use crate::error::Error;
use crate::models::{ConditionalOrder, OrderStatus};
use crate::trigger::should_fire;
use crate::Result;

pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome counters for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub fired: usize,
    pub executed: usize,
    pub failed: usize,
}

/// Turns fired conditional orders into exchange orders, exactly once
///
/// A record is moved to TRIGGERED and persisted before the exchange is
/// called, so a second sweep can never claim it and a crash leaves it
/// visible. Whatever the exchange says, the record ends EXECUTED or FAILED;
/// there are no retries.
pub struct ExecutionCoordinator {
    store: Arc<TriggerStore>,
    oracle: Arc<dyn PriceOracle>,
    gateway: Arc<dyn ExchangeGateway>,
    rules: Arc<SymbolRulesCache>,
    guard: tokio::sync::Mutex<()>,
    submit_timeout: Duration,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<TriggerStore>,
        oracle: Arc<dyn PriceOracle>,
        gateway: Arc<dyn ExchangeGateway>,
        rules: Arc<SymbolRulesCache>,
    ) -> Self {
        Self {
            store,
            oracle,
            gateway,
            rules,
            guard: tokio::sync::Mutex::new(()),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    /// Upper bound on one submission, including position setup calls
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<TriggerStore> {
        &self.store
    }

    /// Run one sweep unless another is still going
    ///
    /// Returns `None` when the tick was dropped.
    pub async fn tick(&self) -> Option<SweepReport> {
        let Ok(_guard) = self.guard.try_lock() else {
            tracing::debug!("Previous sweep still running, skipping tick");
            return None;
        };

        Some(self.sweep().await)
    }

    /// Evaluate every PENDING record once
    ///
    /// TRIGGERED records are in flight (or stuck after a crash) and are left
    /// alone. One record failing never stops the rest of the sweep.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut prices = PriceBook::new(self.oracle.clone());

        for order in self.store.active() {
            if order.status != OrderStatus::Pending {
                continue;
            }
            report.evaluated += 1;

            let current_price = prices.price(&order.symbol).await;
            if !should_fire(
                order.order_type,
                order.side,
                order.trigger_price,
                current_price,
            ) {
                continue;
            }

            // the record may have been edited since the snapshot
            let order = match self.store.mark_triggered(order.id, current_price, Utc::now()) {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    tracing::debug!(id = order.id, "Order changed or already claimed, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(id = order.id, "Failed to mark order triggered: {}", e);
                    continue;
                }
            };
            report.fired += 1;

            tracing::info!(
                id = order.id,
                symbol = %order.symbol,
                side = %order.side,
                order_type = %order.order_type,
                trigger_price = order.trigger_price,
                current_price,
                "Trigger fired"
            );

            if self.execute(&order, current_price).await {
                report.executed += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.fired > 0 {
            tracing::info!(
                evaluated = report.evaluated,
                fired = report.fired,
                executed = report.executed,
                failed = report.failed,
                "Sweep complete"
            );
        }

        report
    }

    /// Submit a TRIGGERED record and record the outcome; true on success
    async fn execute(&self, order: &ConditionalOrder, current_price: f64) -> bool {
        match self.submit(order, current_price).await {
            Ok(exchange_order_id) => {
                tracing::info!(
                    id = order.id,
                    exchange_order_id = %exchange_order_id,
                    "Conditional order executed"
                );
                if let Err(e) = self
                    .store
                    .mark_executed(order.id, exchange_order_id, Utc::now())
                {
                    tracing::error!(id = order.id, "Failed to record execution: {}", e);
                }
                true
            }
            Err(e) => {
                tracing::error!(id = order.id, symbol = %order.symbol, "Submission failed: {}", e);
                if let Err(e) = self.store.mark_failed(order.id, e.reason()) {
                    tracing::error!(id = order.id, "Failed to record failure: {}", e);
                }
                false
            }
        }
    }

    async fn submit(&self, order: &ConditionalOrder, current_price: f64) -> Result<String> {
        let rule = self.rules.get_rule(&order.symbol).await;
        let prepared = PreparedOrder::build(order, &rule, current_price)?;

        tracing::debug!(
            id = order.id,
            quantity = %prepared.quantity,
            price = ?prepared.price,
            "Submitting order"
        );

        tokio::time::timeout(self.submit_timeout, self.gateway.submit(&prepared))
            .await
            .map_err(|_| {
                Error::Network(format!(
                    "submission timed out after {}s",
                    self.submit_timeout.as_secs()
                ))
            })?
    }

    /// Log records left TRIGGERED by an earlier run
    ///
    /// They are not resubmitted or reconciled; the ids are returned so the
    /// caller can surface them.
    pub fn report_in_flight(&self) -> Vec<u64> {
        let stuck: Vec<u64> = self
            .store
            .active()
            .into_iter()
            .filter(|o| o.status == OrderStatus::Triggered)
            .map(|o| {
                tracing::warn!(
                    id = o.id,
                    symbol = %o.symbol,
                    trigger_time = ?o.trigger_time,
                    "Order was TRIGGERED when the previous run stopped; check the exchange manually"
                );
                o.id
            })
            .collect();
        stuck
    }
}
