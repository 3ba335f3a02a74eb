use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use super::json_file::write_atomic;
use crate::models::SymbolRule;
use crate::Result;

/// Full set of cached symbol rules, swapped as one unit on refresh
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSnapshot {
    pub rules: HashMap<String, SymbolRule>,
    pub last_update: Option<DateTime<Utc>>,
}

/// JSON file mirror of the symbol-rule cache
#[derive(Debug, Clone)]
pub struct RuleCacheFile {
    path: PathBuf,
}

impl RuleCacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<RuleSnapshot> {
        if !self.path.exists() {
            return Ok(RuleSnapshot::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        let mut snapshot: RuleSnapshot = serde_json::from_str(&raw)?;

        snapshot.rules.retain(|symbol, rule| match rule.check_bounds() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Dropping cached symbol rule: {}", e);
                false
            }
        });
        Ok(snapshot)
    }

    pub fn save(&self, snapshot: &RuleSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &json)
    }
}
