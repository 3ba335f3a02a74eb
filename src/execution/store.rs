use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Error;
use crate::models::{ConditionalOrder, OrderDraft, OrderPatch, OrderStatus};
use crate::persistence::OrderRepository;
use crate::trigger::should_fire;
use crate::Result;

struct StoreState {
    orders: Vec<ConditionalOrder>,
    next_id: u64,
}

/// Sole owner of conditional-order state
///
/// Every read and write goes through one mutex, and each mutation rewrites the
/// repository while still holding it, so the scheduler and external callers
/// can never interleave partial updates. A failed save is logged and the
/// in-memory state is kept.
pub struct TriggerStore {
    state: Mutex<StoreState>,
    repository: Arc<dyn OrderRepository>,
}

impl TriggerStore {
    /// Load records from `repository`, starting empty if that fails
    pub fn open(repository: Arc<dyn OrderRepository>) -> Self {
        let orders = match repository.load() {
            Ok(orders) => {
                tracing::info!("Loaded {} conditional orders", orders.len());
                orders
            }
            Err(e) => {
                tracing::warn!("Failed to load conditional orders, starting empty: {}", e);
                Vec::new()
            }
        };

        let next_id = orders.iter().map(|o| o.id).max().unwrap_or(0) + 1;

        Self {
            state: Mutex::new(StoreState { orders, next_id }),
            repository,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist the current list; errors are logged, never propagated
    fn persist(&self, state: &StoreState) {
        if let Err(e) = self.repository.save(&state.orders) {
            tracing::error!("Failed to persist conditional orders: {}", e);
        }
    }

    /// Explicit full rewrite of the backing file
    pub fn save_to_disk(&self) -> Result<()> {
        let state = self.lock();
        self.repository.save(&state.orders)
    }

    pub fn list(&self) -> Vec<ConditionalOrder> {
        self.lock().orders.clone()
    }

    pub fn get(&self, id: u64) -> Option<ConditionalOrder> {
        self.lock().orders.iter().find(|o| o.id == id).cloned()
    }

    /// PENDING and TRIGGERED records
    pub fn active(&self) -> Vec<ConditionalOrder> {
        self.lock()
            .orders
            .iter()
            .filter(|o| o.is_active())
            .cloned()
            .collect()
    }

    pub fn create(&self, draft: OrderDraft) -> Result<u64> {
        self.create_at(draft, Utc::now())
    }

    pub fn create_at(&self, draft: OrderDraft, now: DateTime<Utc>) -> Result<u64> {
        draft.validate()?;

        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let order = ConditionalOrder {
            id,
            symbol: draft.symbol.trim().to_uppercase(),
            side: draft.side,
            order_type: draft.order_type,
            quantity: draft.quantity,
            trigger_price: draft.trigger_price,
            order_price: draft.order_price,
            status: OrderStatus::Pending,
            create_time: now,
            trigger_time: None,
            execute_time: None,
            exchange_order_id: None,
            remark: draft.remark,
            leverage: draft.leverage,
            margin_type: draft.margin_type,
            fail_reason: None,
        };

        tracing::info!(
            id,
            symbol = %order.symbol,
            side = %order.side,
            order_type = %order.order_type,
            trigger_price = order.trigger_price,
            "Created conditional order"
        );

        state.orders.push(order);
        self.persist(&state);
        Ok(id)
    }

    /// Apply `patch`; `Ok(false)` when `id` is unknown
    ///
    /// Quantity and prices may only change while PENDING; the remark can be
    /// edited in any state.
    pub fn update_fields(&self, id: u64, patch: OrderPatch) -> Result<bool> {
        patch.validate()?;

        let mut state = self.lock();
        let Some(order) = state.orders.iter_mut().find(|o| o.id == id) else {
            return Ok(false);
        };

        if patch.touches_execution_fields() && order.status != OrderStatus::Pending {
            return Err(Error::InvalidState {
                id,
                status: order.status,
                action: "edit",
            });
        }

        if let Some(quantity) = patch.quantity {
            order.quantity = quantity;
        }
        if let Some(trigger_price) = patch.trigger_price {
            order.trigger_price = trigger_price;
        }
        if let Some(order_price) = patch.order_price {
            order.order_price = Some(order_price);
        }
        if let Some(remark) = patch.remark {
            order.remark = remark;
        }

        self.persist(&state);
        Ok(true)
    }

    /// PENDING -> CANCELLED; `Ok(false)` when `id` is unknown
    pub fn cancel(&self, id: u64) -> Result<bool> {
        let changed = self.transition(id, OrderStatus::Cancelled, "cancel", |_| {})?;
        if changed {
            tracing::info!(id, "Cancelled conditional order");
        }
        Ok(changed)
    }

    /// Remove a record that is no longer active
    pub fn delete(&self, id: u64) -> Result<bool> {
        let mut state = self.lock();
        let Some(index) = state.orders.iter().position(|o| o.id == id) else {
            return Ok(false);
        };

        let status = state.orders[index].status;
        if status.is_active() {
            return Err(Error::InvalidState {
                id,
                status,
                action: "delete",
            });
        }

        state.orders.remove(index);
        self.persist(&state);
        tracing::info!(id, "Deleted conditional order");
        Ok(true)
    }

    /// Claim a PENDING record for execution if it fires at `current_price`
    ///
    /// The trigger is evaluated against the record as it stands under the
    /// lock, so an edit made after the sweep's snapshot is honoured. Returns
    /// the claimed record, or `None` if it is gone, already left PENDING (a
    /// second sweep losing the race) or no longer fires.
    pub fn mark_triggered(
        &self,
        id: u64,
        current_price: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<ConditionalOrder>> {
        let mut state = self.lock();
        let Some(order) = state.orders.iter_mut().find(|o| o.id == id) else {
            return Ok(None);
        };
        if order.status != OrderStatus::Pending {
            return Ok(None);
        }
        if !should_fire(
            order.order_type,
            order.side,
            order.trigger_price,
            current_price,
        ) {
            return Ok(None);
        }

        order.status = OrderStatus::Triggered;
        order.trigger_time = Some(at);
        let claimed = order.clone();
        self.persist(&state);
        Ok(Some(claimed))
    }

    /// TRIGGERED -> EXECUTED
    pub fn mark_executed(
        &self,
        id: u64,
        exchange_order_id: String,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(id, OrderStatus::Executed, "mark executed", |order| {
            order.exchange_order_id = Some(exchange_order_id);
            order.execute_time = Some(at);
        })
    }

    /// TRIGGERED -> FAILED
    pub fn mark_failed(&self, id: u64, reason: String) -> Result<bool> {
        self.transition(id, OrderStatus::Failed, "mark failed", |order| {
            order.fail_reason = Some(reason);
        })
    }

    fn transition(
        &self,
        id: u64,
        next: OrderStatus,
        action: &'static str,
        apply: impl FnOnce(&mut ConditionalOrder),
    ) -> Result<bool> {
        let mut state = self.lock();
        let Some(order) = state.orders.iter_mut().find(|o| o.id == id) else {
            return Ok(false);
        };

        if !order.status.can_transition_to(next) {
            return Err(Error::InvalidState {
                id,
                status: order.status,
                action,
            });
        }

        order.status = next;
        apply(order);
        self.persist(&state);
        Ok(true)
    }
}
