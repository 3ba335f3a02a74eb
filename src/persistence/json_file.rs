use std::fs;
use std::path::{Path, PathBuf};

use super::OrderRepository;
use crate::models::ConditionalOrder;
use crate::Result;

/// Conditional orders stored as a pretty-printed JSON array
///
/// Every save rewrites the whole file through a temporary sibling and a
/// rename, so a crash mid-write leaves the previous file intact.
#[derive(Debug, Clone)]
pub struct JsonOrderFile {
    path: PathBuf,
}

impl JsonOrderFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OrderRepository for JsonOrderFile {
    /// A missing file is an empty list; unreadable content is an error
    fn load(&self) -> Result<Vec<ConditionalOrder>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let orders: Vec<ConditionalOrder> = serde_json::from_str(&raw)?;
        Ok(orders)
    }

    fn save(&self, orders: &[ConditionalOrder]) -> Result<()> {
        let json = serde_json::to_vec_pretty(orders)?;
        write_atomic(&self.path, &json)
    }
}

/// Write `bytes` to `path` via `<path>.tmp` + rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
