// Trigger decision module
pub mod evaluator;

pub use evaluator::should_fire;
