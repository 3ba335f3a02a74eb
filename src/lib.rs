// Core modules
pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod trigger;

// Re-export commonly used types
pub use error::Error;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Error>;
