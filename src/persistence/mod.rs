// Durable storage for conditional orders and symbol rules
pub mod in_memory;
pub mod json_file;
pub mod lock;
pub mod rule_cache;

pub use in_memory::InMemoryRepository;
pub use json_file::JsonOrderFile;
pub use lock::OrdersLock;
pub use rule_cache::{RuleCacheFile, RuleSnapshot};

use crate::models::ConditionalOrder;
use crate::Result;

/// Storage port behind `TriggerStore`
///
/// `save` always receives the complete record list and replaces whatever was
/// stored before.
pub trait OrderRepository: Send + Sync {
    fn load(&self) -> Result<Vec<ConditionalOrder>>;

    fn save(&self, orders: &[ConditionalOrder]) -> Result<()>;
}
