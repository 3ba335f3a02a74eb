// Exchange REST clients
pub mod futures;
pub mod signing;

pub use futures::{ClientConfig, FuturesClient, OpenOrder, OrderAck};
