// Trigger evaluation loop and order submission
pub mod coordinator;
pub mod gateway;
pub mod precision;
pub mod price_feed;
pub mod scheduler;
pub mod store;
pub mod symbol_rules;

pub use coordinator::{ExecutionCoordinator, SweepReport};
pub use gateway::{ExchangeGateway, PreparedOrder};
pub use precision::{adjust_price, adjust_quantity, check_notional, format_decimal};
pub use price_feed::{PriceBook, PriceOracle};
pub use scheduler::Scheduler;
pub use store::TriggerStore;
pub use symbol_rules::{fallback_rule, next_local_midnight, RulesSource, SymbolRulesCache};
