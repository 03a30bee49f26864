//! # Delta Hedger
//!
//! Automated delta-neutral hedging for exchange-traded option positions.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and the hot-swappable settings store
//! - `error`: Domain error taxonomy shared across every layer
//! - `pricing`: Black-Scholes greeks for European options
//! - `position`: Position snapshots and the append-only hedge ledger
//! - `broker`: Broker seam with an IG gateway client and an in-memory mock
//! - `hedger`: Hedge decision, execution and batch reporting
//! - `monitor`: Background scheduler publishing a per-position status table

pub mod broker;
pub mod config;
pub mod error;
pub mod hedger;
pub mod monitor;
pub mod position;
pub mod pricing;

pub use config::Config;
pub use error::HedgeError;
