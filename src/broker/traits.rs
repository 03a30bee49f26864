//! The broker-client contract consumed by the hedging core.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{DealConfirmation, MarketSnapshot, OrderDirection};
use crate::error::HedgeError;
use crate::position::Position;

/// Narrow interface to a broker session.
///
/// Authentication, token refresh and rate limiting are the implementation's
/// concern; the core only sees these three operations. Every call must carry
/// a bounded timeout so no caller blocks indefinitely.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetch all open option positions.
    async fn fetch_positions(&self) -> Result<Vec<Position>, HedgeError>;

    /// Fetch the current market snapshot for one instrument.
    async fn fetch_market_snapshot(&self, epic: &str) -> Result<MarketSnapshot, HedgeError>;

    /// Submit a hedge order on the underlying instrument.
    async fn submit_hedge_order(
        &self,
        epic: &str,
        direction: OrderDirection,
        size: Decimal,
    ) -> Result<DealConfirmation, HedgeError>;
}
