use std::sync::{Mutex, PoisonError};

use super::OrderRepository;
use crate::models::ConditionalOrder;
use crate::Result;

/// Non-durable repository, handy for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    orders: Mutex<Vec<ConditionalOrder>>,
    saves: Mutex<usize>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what was last saved
    pub fn stored(&self) -> Vec<ConditionalOrder> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OrderRepository for InMemoryRepository {
    fn load(&self) -> Result<Vec<ConditionalOrder>> {
        Ok(self.stored())
    }

    fn save(&self, orders: &[ConditionalOrder]) -> Result<()> {
        *self.orders.lock().unwrap_or_else(PoisonError::into_inner) = orders.to_vec();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
