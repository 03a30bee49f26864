//! Mock broker client for paper trading and tests.
//!
//! Holds positions and snapshots in memory, hands out synthetic deal ids,
//! and supports per-instrument failure injection so error paths can be
//! exercised deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::BrokerClient;
use super::types::{DealConfirmation, MarketSnapshot, OrderDirection};
use crate::error::HedgeError;
use crate::position::Position;

/// One order accepted by the mock, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedOrder {
    pub epic: String,
    pub direction: OrderDirection,
    pub size: Decimal,
    pub deal_id: String,
}

#[derive(Debug, Default)]
struct MockState {
    positions: Vec<Position>,
    snapshots: HashMap<String, MarketSnapshot>,
    submitted: Vec<SubmittedOrder>,
    fail_positions: bool,
    fail_snapshots: HashSet<String>,
    reject_orders: Option<String>,
    session_expired: bool,
}

/// In-memory [`BrokerClient`] implementation.
#[derive(Clone, Default)]
pub struct MockBrokerClient {
    state: Arc<RwLock<MockState>>,
    deal_counter: Arc<AtomicU64>,
    fetch_counter: Arc<AtomicU64>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of open positions.
    pub async fn set_positions(&self, positions: Vec<Position>) {
        self.state.write().await.positions = positions;
    }

    /// Install or update a market snapshot for an instrument.
    pub async fn set_snapshot(&self, snapshot: MarketSnapshot) {
        self.state
            .write()
            .await
            .snapshots
            .insert(snapshot.epic.clone(), snapshot);
    }

    /// Make `fetch_positions` fail with a network error.
    pub async fn fail_positions(&self, fail: bool) {
        self.state.write().await.fail_positions = fail;
    }

    /// Make snapshot fetches for `epic` fail as unavailable.
    pub async fn fail_snapshot(&self, epic: &str) {
        self.state.write().await.fail_snapshots.insert(epic.to_string());
    }

    /// Make all order submissions fail with the given broker detail.
    pub async fn reject_orders(&self, detail: Option<String>) {
        self.state.write().await.reject_orders = detail;
    }

    /// Make every call fail with `SessionExpired`.
    pub async fn expire_session(&self, expired: bool) {
        self.state.write().await.session_expired = expired;
    }

    /// Orders accepted so far, in submission order.
    pub async fn submitted_orders(&self) -> Vec<SubmittedOrder> {
        self.state.read().await.submitted.clone()
    }

    /// How many times `fetch_positions` has been called.
    pub fn position_fetch_count(&self) -> u64 {
        self.fetch_counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn fetch_positions(&self) -> Result<Vec<Position>, HedgeError> {
        self.fetch_counter.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if state.session_expired {
            return Err(HedgeError::SessionExpired);
        }
        if state.fail_positions {
            return Err(HedgeError::Network("simulated position fetch failure".into()));
        }
        Ok(state.positions.clone())
    }

    async fn fetch_market_snapshot(&self, epic: &str) -> Result<MarketSnapshot, HedgeError> {
        let state = self.state.read().await;
        if state.session_expired {
            return Err(HedgeError::SessionExpired);
        }
        if state.fail_snapshots.contains(epic) {
            return Err(HedgeError::MarketDataUnavailable {
                epic: epic.to_string(),
                detail: "simulated snapshot failure".to_string(),
            });
        }
        state
            .snapshots
            .get(epic)
            .cloned()
            .ok_or_else(|| HedgeError::MarketDataUnavailable {
                epic: epic.to_string(),
                detail: "no snapshot seeded".to_string(),
            })
    }

    async fn submit_hedge_order(
        &self,
        epic: &str,
        direction: OrderDirection,
        size: Decimal,
    ) -> Result<DealConfirmation, HedgeError> {
        if size <= Decimal::ZERO {
            return Err(HedgeError::InvalidArgument(format!(
                "order size must be positive, got {size}"
            )));
        }

        let mut state = self.state.write().await;
        if state.session_expired {
            return Err(HedgeError::SessionExpired);
        }
        if let Some(detail) = &state.reject_orders {
            return Err(HedgeError::BrokerRejected(detail.clone()));
        }

        let deal_id = format!("MOCK-{}", self.deal_counter.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(%epic, %direction, %size, %deal_id, at = %Utc::now(), "mock order accepted");
        state.submitted.push(SubmittedOrder {
            epic: epic.to_string(),
            direction,
            size,
            deal_id: deal_id.clone(),
        });

        Ok(DealConfirmation { deal_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::OptionType;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample_position(deal_id: &str) -> Position {
        Position {
            deal_id: deal_id.to_string(),
            epic: "OP.D.SPX.CALL".to_string(),
            underlying_epic: "IX.D.SPTRD.IFS.IP".to_string(),
            option_type: OptionType::Call,
            strike: dec!(100),
            expiry: Utc::now() + Duration::days(180),
            size: dec!(1),
            contract_size: dec!(1),
            entry_price: dec!(5.0),
        }
    }

    #[tokio::test]
    async fn returns_seeded_positions() {
        let mock = MockBrokerClient::new();
        mock.set_positions(vec![sample_position("D1")]).await;

        let positions = mock.fetch_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].deal_id, "D1");
    }

    #[tokio::test]
    async fn injected_snapshot_failure_is_scoped_to_epic() {
        let mock = MockBrokerClient::new();
        mock.set_snapshot(MarketSnapshot {
            epic: "A".to_string(),
            bid: dec!(99),
            offer: dec!(101),
            volatility: Some(0.2),
            update_time: None,
        })
        .await;
        mock.fail_snapshot("B").await;

        assert!(mock.fetch_market_snapshot("A").await.is_ok());
        assert!(matches!(
            mock.fetch_market_snapshot("B").await,
            Err(HedgeError::MarketDataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn orders_are_logged_with_unique_deal_ids() {
        let mock = MockBrokerClient::new();
        let a = mock
            .submit_hedge_order("U", OrderDirection::Buy, dec!(0.5))
            .await
            .unwrap();
        let b = mock
            .submit_hedge_order("U", OrderDirection::Sell, dec!(1.5))
            .await
            .unwrap();
        assert_ne!(a.deal_id, b.deal_id);

        let submitted = mock.submitted_orders().await;
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].direction, OrderDirection::Buy);
    }

    #[tokio::test]
    async fn rejection_carries_broker_detail() {
        let mock = MockBrokerClient::new();
        mock.reject_orders(Some("INSUFFICIENT_FUNDS".to_string())).await;

        let err = mock
            .submit_hedge_order("U", OrderDirection::Buy, dec!(1))
            .await
            .unwrap_err();
        assert_eq!(err, HedgeError::BrokerRejected("INSUFFICIENT_FUNDS".into()));
    }
}
