use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::SymbolRule;
use crate::persistence::{RuleCacheFile, RuleSnapshot};
use crate::Result;

/// Supplier of the exchange's full instrument-rules listing
#[async_trait]
pub trait RulesSource: Send + Sync {
    async fn fetch_rules(&self) -> Result<Vec<SymbolRule>>;
}

/// First local midnight strictly after `now`
pub fn next_local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    local
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::hours(24))
}

/// Built-in precision guesses used when no real rule is available
///
/// Keyed on substrings of the symbol name; this is only a last resort and is
/// not authoritative for any instrument. The returned rule is already expired
/// so the next lookup tries the exchange again.
pub fn fallback_rule(symbol: &str, now: DateTime<Utc>) -> SymbolRule {
    let upper = symbol.to_uppercase();

    // (price precision, quantity precision, step, tick, min qty)
    let (price_precision, quantity_precision, step_size, tick_size, min_qty) =
        if upper.contains("BTC") {
            (1, 3, 0.001, 0.1, 0.001)
        } else if upper.contains("ETH") {
            (2, 3, 0.001, 0.01, 0.001)
        } else if upper.contains("DOGE") || upper.contains("SHIB") || upper.starts_with("1000") {
            (6, 0, 1.0, 0.000001, 1.0)
        } else {
            (4, 1, 0.1, 0.0001, 0.1)
        };

    SymbolRule {
        symbol: upper,
        price_precision,
        quantity_precision,
        min_qty,
        max_qty: 0.0,
        step_size,
        min_price: 0.0,
        max_price: 0.0,
        tick_size,
        min_notional: 5.0,
        fetched_at: now,
        expires_at: now,
    }
}

/// Daily-refreshed cache of per-symbol trading constraints
///
/// Lookups never fail: a stale entry beats no entry, and the fallback table
/// beats nothing at all.
pub struct SymbolRulesCache {
    source: Arc<dyn RulesSource>,
    snapshot: RwLock<Arc<RuleSnapshot>>,
    file: Option<RuleCacheFile>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SymbolRulesCache {
    pub fn new(source: Arc<dyn RulesSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(RuleSnapshot::default())),
            file: None,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Cache mirrored to `file`, seeded from it when readable
    pub fn with_file(source: Arc<dyn RulesSource>, file: RuleCacheFile) -> Self {
        let snapshot = match file.load() {
            Ok(snapshot) => {
                tracing::info!("Loaded {} cached symbol rules", snapshot.rules.len());
                snapshot
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable symbol rule cache: {}", e);
                RuleSnapshot::default()
            }
        };

        Self {
            source,
            snapshot: RwLock::new(Arc::new(snapshot)),
            file: Some(file),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn current(&self) -> Arc<RuleSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached entry regardless of freshness
    pub fn cached(&self, symbol: &str) -> Option<SymbolRule> {
        self.current().rules.get(symbol).cloned()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.current().last_update
    }

    pub async fn get_rule(&self, symbol: &str) -> SymbolRule {
        self.get_rule_at(symbol, Utc::now()).await
    }

    pub async fn get_rule_at(&self, symbol: &str, now: DateTime<Utc>) -> SymbolRule {
        let symbol = symbol.to_uppercase();
        let cached = self.cached(&symbol);
        if let Some(rule) = &cached {
            if rule.is_fresh(now) {
                return rule.clone();
            }
        }

        {
            let _guard = self.refresh_lock.lock().await;

            // another caller may have refreshed while we waited
            if let Some(rule) = self.cached(&symbol).filter(|r| r.is_fresh(now)) {
                return rule;
            }

            match self.refresh_locked(now).await {
                Ok(()) => {
                    if let Some(rule) = self.cached(&symbol) {
                        return rule;
                    }
                    tracing::warn!(symbol = %symbol, "Symbol missing from exchange rules");
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, "Symbol rule refresh failed: {}", e);
                }
            }
        }

        if let Some(rule) = cached {
            tracing::info!(symbol = %symbol, "Using last known symbol rule");
            return rule;
        }

        tracing::warn!(symbol = %symbol, "No symbol rule available, using built-in defaults");
        fallback_rule(&symbol, now)
    }

    /// Fetch the full listing and swap it in
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked(Utc::now()).await
    }

    async fn refresh_locked(&self, now: DateTime<Utc>) -> Result<()> {
        let fetched = self.source.fetch_rules().await?;
        let expires_at = next_local_midnight(now);

        let rules: HashMap<String, SymbolRule> = fetched
            .into_iter()
            .map(|mut rule| {
                rule.fetched_at = now;
                rule.expires_at = expires_at;
                (rule.symbol.clone(), rule)
            })
            .collect();

        tracing::info!(
            "Refreshed {} symbol rules (valid until {})",
            rules.len(),
            expires_at
        );

        let snapshot = Arc::new(RuleSnapshot {
            rules,
            last_update: Some(now),
        });

        if let Some(file) = &self.file {
            if let Err(e) = file.save(&snapshot) {
                tracing::error!("Failed to persist symbol rules: {}", e);
            }
        }

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        Ok(())
    }
}
