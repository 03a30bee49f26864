//! Broker connectivity for hedge execution.
//!
//! The hedging core consumes a narrow async interface: fetch open positions,
//! fetch a market snapshot for one instrument, submit a hedge order. The IG
//! REST gateway implements it for live trading; the mock client implements
//! it for paper trading and tests.

mod ig;
pub mod mock;
mod traits;
mod types;

pub use ig::IgClient;
pub use mock::MockBrokerClient;
pub use traits::BrokerClient;
pub use types::*;
