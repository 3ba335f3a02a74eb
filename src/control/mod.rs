// Daemon control surface and single-writer routing
pub mod client;
pub mod server;

pub use client::ControlClient;
pub use server::{create_router, serve, ApiError};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::execution::TriggerStore;
use crate::models::{ConditionalOrder, OrderDraft, OrderPatch};
use crate::persistence::{JsonOrderFile, OrdersLock};
use crate::Result;

/// Where CLI order commands are applied
///
/// The orders file has exactly one writer: whoever holds its lock. With no
/// daemon running the command takes the lock and edits the file itself;
/// otherwise it goes through the daemon's control API.
pub enum OrderAccess {
    Local {
        store: TriggerStore,
        _lock: OrdersLock,
    },
    Remote(ControlClient),
}

impl OrderAccess {
    pub fn open(orders_path: &Path, control_url: &str, timeout: Duration) -> Result<Self> {
        match OrdersLock::try_acquire(orders_path)? {
            Some(lock) => {
                let store = TriggerStore::open(Arc::new(JsonOrderFile::new(orders_path)));
                Ok(Self::Local { store, _lock: lock })
            }
            None => {
                tracing::debug!("Orders file is locked, using control API at {}", control_url);
                Ok(Self::Remote(ControlClient::new(control_url, timeout)?))
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub async fn list(&self, active: bool) -> Result<Vec<ConditionalOrder>> {
        match self {
            Self::Local { store, .. } if active => Ok(store.active()),
            Self::Local { store, .. } => Ok(store.list()),
            Self::Remote(client) => client.list(active).await,
        }
    }

    pub async fn get(&self, id: u64) -> Result<Option<ConditionalOrder>> {
        match self {
            Self::Local { store, .. } => Ok(store.get(id)),
            Self::Remote(client) => client.get(id).await,
        }
    }

    pub async fn create(&self, draft: OrderDraft) -> Result<u64> {
        match self {
            Self::Local { store, .. } => store.create(draft),
            Self::Remote(client) => client.create(draft).await,
        }
    }

    pub async fn update_fields(&self, id: u64, patch: OrderPatch) -> Result<bool> {
        match self {
            Self::Local { store, .. } => store.update_fields(id, patch),
            Self::Remote(client) => client.update_fields(id, patch).await,
        }
    }

    pub async fn cancel(&self, id: u64) -> Result<bool> {
        match self {
            Self::Local { store, .. } => store.cancel(id),
            Self::Remote(client) => client.cancel(id).await,
        }
    }

    pub async fn delete(&self, id: u64) -> Result<bool> {
        match self {
            Self::Local { store, .. } => store.delete(id),
            Self::Remote(client) => client.delete(id).await,
        }
    }
}
