//! Hedge decision and execution.
//!
//! [`DeltaHedger`] turns a position plus a market snapshot into a hedge
//! decision, executes it through the broker seam, and records every
//! attempt in the hedge ledger. Batch operations report per-position
//! outcomes instead of failing wholesale.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::broker::{BrokerClient, OrderDirection};
use crate::config::SettingsStore;
use crate::error::HedgeError;
use crate::position::{HedgeLedger, HedgeRecord, Position};
use crate::pricing::{calculate_greeks, Greeks};

/// Delta state of one position against the current threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaAssessment {
    pub greeks: Greeks,
    /// Position-scaled delta: per-unit delta times signed size times
    /// contract size.
    pub position_delta: f64,
    pub needs_hedge: bool,
    pub direction: OrderDirection,
    /// Absolute hedge size that would flatten the delta, rounded and
    /// clamped to the configured bounds.
    pub suggested_size: Decimal,
    pub underlying_price: Decimal,
    /// Volatility fed into the pricing model after default substitution
    /// and flooring.
    pub volatility: f64,
    pub time_to_expiry: f64,
}

/// Valuation figures for one position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionMetrics {
    pub current_price: Decimal,
    /// Mark-to-market profit against the entry price.
    pub pnl: Decimal,
    /// Gross notional at the current price, always non-negative.
    pub exposure: Decimal,
}

/// Result of a single hedge attempt that did not error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HedgeOutcome {
    Executed {
        deal_id: String,
        direction: OrderDirection,
        size: Decimal,
        resulting_delta: f64,
    },
    Skipped {
        reason: String,
    },
}

/// One failed position in a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub deal_id: String,
    pub error: HedgeError,
}

/// Per-position outcomes of a batch hedge; every fetched position
/// appears exactly once, on one side or the other.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct BatchHedgeReport {
    pub succeeded: Vec<(String, HedgeOutcome)>,
    pub failed: Vec<BatchFailure>,
}

impl BatchHedgeReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Aggregate view across all open positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub position_count: usize,
    /// Sum of position-scaled deltas over positions whose market data
    /// was available.
    pub total_delta: f64,
    pub total_pnl: Decimal,
    pub total_exposure: Decimal,
    pub positions_needing_hedge: usize,
    /// Positions whose underlying snapshot could not be fetched and are
    /// therefore excluded from the totals.
    pub unpriced_positions: usize,
}

/// Decides and executes delta hedges over the broker seam.
pub struct DeltaHedger {
    broker: Arc<dyn BrokerClient>,
    settings: Arc<SettingsStore>,
    ledger: HedgeLedger,
}

impl DeltaHedger {
    pub fn new(broker: Arc<dyn BrokerClient>, settings: Arc<SettingsStore>) -> Self {
        Self {
            broker,
            settings,
            ledger: HedgeLedger::new(),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Hedge history for one position, oldest first.
    pub async fn hedge_history(&self, deal_id: &str) -> Vec<HedgeRecord> {
        self.ledger.history(deal_id).await
    }

    /// All open positions as the broker reports them.
    pub async fn get_open_positions(&self) -> Result<Vec<Position>, HedgeError> {
        self.broker.fetch_positions().await
    }

    /// Find one open position by deal id.
    pub async fn get_position(&self, deal_id: &str) -> Result<Position, HedgeError> {
        self.get_open_positions()
            .await?
            .into_iter()
            .find(|p| p.deal_id == deal_id)
            .ok_or_else(|| HedgeError::NotFound(format!("position {deal_id}")))
    }

    /// Compute greeks and the hedge decision for one position from an
    /// underlying market snapshot.
    pub async fn assess_position(
        &self,
        position: &Position,
        underlying_price: Decimal,
        market_volatility: Option<f64>,
    ) -> Result<DeltaAssessment, HedgeError> {
        if underlying_price <= Decimal::ZERO {
            return Err(HedgeError::InvalidArgument(format!(
                "underlying price must be positive, got {underlying_price}"
            )));
        }
        let settings = self.settings.current().await;
        let spot = underlying_price
            .to_f64()
            .ok_or_else(|| HedgeError::InvalidArgument("unrepresentable price".to_string()))?;
        let strike = position
            .strike
            .to_f64()
            .ok_or_else(|| HedgeError::InvalidArgument("unrepresentable strike".to_string()))?;

        let now = Utc::now();
        let time_to_expiry = position.time_to_expiry(now);
        let volatility = market_volatility
            .unwrap_or(settings.default_volatility)
            .max(settings.min_volatility);

        let greeks = calculate_greeks(
            spot,
            strike,
            time_to_expiry,
            volatility,
            position.option_type,
            settings.risk_free_rate,
        );
        let position_delta = greeks.delta * position.scaled_units();

        // An expired position never needs a hedge, whatever its delta.
        let needs_hedge =
            !position.is_expired(now) && position_delta.abs() > settings.delta_threshold;
        let direction = if position_delta < 0.0 {
            OrderDirection::Buy
        } else {
            OrderDirection::Sell
        };
        let suggested_size = Decimal::from_f64(position_delta.abs())
            .unwrap_or(Decimal::ZERO)
            .round_dp(settings.size_precision)
            .clamp(settings.min_hedge_size, settings.max_hedge_size);

        Ok(DeltaAssessment {
            greeks,
            position_delta,
            needs_hedge,
            direction,
            suggested_size,
            underlying_price,
            volatility,
            time_to_expiry,
        })
    }

    /// Fetch the underlying snapshot and assess one position.
    pub async fn assess_live(&self, position: &Position) -> Result<DeltaAssessment, HedgeError> {
        let snapshot = self
            .broker
            .fetch_market_snapshot(&position.underlying_epic)
            .await?;
        self.assess_position(position, snapshot.mid(), snapshot.volatility)
            .await
    }

    /// Mark-to-market metrics from the option's own snapshot.
    pub async fn position_metrics(
        &self,
        position: &Position,
    ) -> Result<PositionMetrics, HedgeError> {
        let snapshot = self.broker.fetch_market_snapshot(&position.epic).await?;
        let current_price = snapshot.mid();
        let pnl = (current_price - position.entry_price) * position.size * position.contract_size;
        let exposure = position.size.abs() * position.contract_size * current_price;
        Ok(PositionMetrics {
            current_price,
            pnl,
            exposure,
        })
    }

    /// Execute the hedge an assessment calls for.
    ///
    /// Skips below-threshold positions unless `manual` is set; expired
    /// positions are skipped unconditionally. Every submitted order is
    /// recorded in the ledger, including ones the broker refused.
    #[instrument(skip(self, position, assessment), fields(deal_id = %position.deal_id))]
    pub async fn hedge_position(
        &self,
        position: &Position,
        assessment: &DeltaAssessment,
        manual: bool,
    ) -> Result<HedgeOutcome, HedgeError> {
        if position.is_expired(Utc::now()) {
            return Ok(HedgeOutcome::Skipped {
                reason: "position expired".to_string(),
            });
        }
        if !manual && !assessment.needs_hedge {
            return Ok(HedgeOutcome::Skipped {
                reason: format!(
                    "delta {:.4} within threshold",
                    assessment.position_delta
                ),
            });
        }

        let direction = assessment.direction;
        let size = assessment.suggested_size;
        let resulting_delta = assessment.position_delta
            + direction.sign() * size.to_f64().unwrap_or(0.0);

        let submission = self
            .broker
            .submit_hedge_order(&position.underlying_epic, direction, size)
            .await;

        let record = HedgeRecord {
            timestamp: Utc::now(),
            direction,
            size,
            resulting_delta,
            deal_id: submission.as_ref().ok().map(|c| c.deal_id.clone()),
            manual,
        };
        self.ledger.append(&position.deal_id, record).await;

        match submission {
            Ok(confirmation) => {
                info!(
                    hedge_deal_id = %confirmation.deal_id,
                    %direction,
                    %size,
                    resulting_delta,
                    "hedge executed"
                );
                Ok(HedgeOutcome::Executed {
                    deal_id: confirmation.deal_id,
                    direction,
                    size,
                    resulting_delta,
                })
            }
            Err(err) => {
                warn!(error = %err, "hedge order failed");
                Err(err)
            }
        }
    }

    /// Hedge one position by deal id, with an optional caller-supplied
    /// size overriding the suggested one. Only `force` bypasses the
    /// threshold check; an explicit size on an unforced call still
    /// skips when the position is within threshold.
    pub async fn hedge_position_by_id(
        &self,
        deal_id: &str,
        size: Option<Decimal>,
        force: bool,
    ) -> Result<HedgeOutcome, HedgeError> {
        if let Some(size) = size {
            if size <= Decimal::ZERO {
                return Err(HedgeError::InvalidArgument(format!(
                    "hedge size must be positive, got {size}"
                )));
            }
        }

        let position = self.get_position(deal_id).await?;
        let mut assessment = self.assess_live(&position).await?;
        if let Some(size) = size {
            assessment.suggested_size = size;
        }
        self.hedge_position(&position, &assessment, force).await
    }

    /// Assess and hedge every open position, collecting per-position
    /// outcomes. A failure on one position never aborts the rest.
    #[instrument(skip(self))]
    pub async fn hedge_all_positions(&self, manual: bool) -> Result<BatchHedgeReport, HedgeError> {
        let positions = self.broker.fetch_positions().await?;
        let mut report = BatchHedgeReport::default();

        for position in &positions {
            let outcome = async {
                let assessment = self.assess_live(position).await?;
                self.hedge_position(position, &assessment, manual).await
            }
            .await;

            match outcome {
                Ok(outcome) => report.succeeded.push((position.deal_id.clone(), outcome)),
                Err(error) => report.failed.push(BatchFailure {
                    deal_id: position.deal_id.clone(),
                    error,
                }),
            }
        }

        info!(
            total = report.total(),
            failed = report.failed.len(),
            "batch hedge finished"
        );
        Ok(report)
    }

    /// Aggregate delta view across all open positions. Positions whose
    /// market data is unavailable are counted but excluded from totals.
    pub async fn portfolio_summary(&self) -> Result<PortfolioSummary, HedgeError> {
        let positions = self.broker.fetch_positions().await?;
        let mut summary = PortfolioSummary {
            position_count: positions.len(),
            total_delta: 0.0,
            total_pnl: Decimal::ZERO,
            total_exposure: Decimal::ZERO,
            positions_needing_hedge: 0,
            unpriced_positions: 0,
        };

        for position in &positions {
            match self.assess_live(position).await {
                Ok(assessment) => {
                    summary.total_delta += assessment.position_delta;
                    if assessment.needs_hedge {
                        summary.positions_needing_hedge += 1;
                    }
                }
                Err(err) => {
                    warn!(deal_id = %position.deal_id, error = %err, "excluding unpriced position");
                    summary.unpriced_positions += 1;
                    continue;
                }
            }
            // Valuation needs the option's own quote, which can be
            // missing independently of the underlying's.
            if let Ok(metrics) = self.position_metrics(position).await {
                summary.total_pnl += metrics.pnl;
                summary.total_exposure += metrics.exposure;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MarketSnapshot, MockBrokerClient};
    use crate::config::HedgeSettings;
    use crate::pricing::OptionType;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn hedger(mock: &MockBrokerClient) -> DeltaHedger {
        let settings =
            Arc::new(SettingsStore::new(HedgeSettings::default()).expect("defaults are valid"));
        DeltaHedger::new(Arc::new(mock.clone()), settings)
    }

    fn long_call(deal_id: &str, underlying: &str) -> Position {
        Position {
            deal_id: deal_id.to_string(),
            epic: format!("OP.{deal_id}"),
            underlying_epic: underlying.to_string(),
            option_type: OptionType::Call,
            strike: dec!(100),
            expiry: Utc::now() + Duration::days(183),
            size: dec!(2),
            contract_size: dec!(1),
            entry_price: dec!(5),
        }
    }

    async fn seed_underlying(mock: &MockBrokerClient, epic: &str, mid: Decimal) {
        mock.set_snapshot(MarketSnapshot {
            epic: epic.to_string(),
            bid: mid - dec!(0.5),
            offer: mid + dec!(0.5),
            volatility: Some(0.2),
            update_time: None,
        })
        .await;
    }

    #[tokio::test]
    async fn assessment_flags_breaching_delta() {
        let mock = MockBrokerClient::new();
        let hedger = hedger(&mock);
        let position = long_call("D1", "UND");

        let assessment = hedger
            .assess_position(&position, dec!(110), Some(0.2))
            .await
            .unwrap();
        // Deep in the money, two contracts: delta well past the 0.05 default.
        assert!(assessment.position_delta > 1.0);
        assert!(assessment.needs_hedge);
        assert_eq!(assessment.direction, OrderDirection::Sell);
        assert!(assessment.suggested_size > dec!(1));
    }

    #[tokio::test]
    async fn short_position_hedges_with_a_buy() {
        let mock = MockBrokerClient::new();
        let hedger = hedger(&mock);
        let mut position = long_call("D1", "UND");
        position.size = dec!(-2);

        let assessment = hedger
            .assess_position(&position, dec!(110), Some(0.2))
            .await
            .unwrap();
        assert!(assessment.position_delta < 0.0);
        assert_eq!(assessment.direction, OrderDirection::Buy);
    }

    #[tokio::test]
    async fn expired_position_never_needs_hedge() {
        let mock = MockBrokerClient::new();
        let hedger = hedger(&mock);
        let mut position = long_call("D1", "UND");
        position.expiry = Utc::now() - Duration::days(1);

        let assessment = hedger
            .assess_position(&position, dec!(150), Some(0.2))
            .await
            .unwrap();
        assert!(!assessment.needs_hedge);

        let outcome = hedger
            .hedge_position(&position, &assessment, true)
            .await
            .unwrap();
        assert!(matches!(outcome, HedgeOutcome::Skipped { .. }));
        assert!(hedger.hedge_history("D1").await.is_empty());
    }

    #[tokio::test]
    async fn skip_leaves_no_ledger_record() {
        let mock = MockBrokerClient::new();
        let hedger = hedger(&mock);
        let position = long_call("D1", "UND");

        // At the money with tiny size: delta below the threshold.
        let mut small = position.clone();
        small.size = dec!(0.01);
        let assessment = hedger
            .assess_position(&small, dec!(100), Some(0.2))
            .await
            .unwrap();
        assert!(!assessment.needs_hedge);

        let outcome = hedger
            .hedge_position(&small, &assessment, false)
            .await
            .unwrap();
        assert!(matches!(outcome, HedgeOutcome::Skipped { .. }));
        assert!(hedger.hedge_history("D1").await.is_empty());
        assert!(mock.submitted_orders().await.is_empty());
    }

    #[tokio::test]
    async fn manual_hedge_trades_below_threshold() {
        let mock = MockBrokerClient::new();
        let hedger = hedger(&mock);
        let mut position = long_call("D1", "UND");
        position.size = dec!(0.01);

        let assessment = hedger
            .assess_position(&position, dec!(100), Some(0.2))
            .await
            .unwrap();
        assert!(!assessment.needs_hedge);

        let outcome = hedger
            .hedge_position(&position, &assessment, true)
            .await
            .unwrap();
        assert!(matches!(outcome, HedgeOutcome::Executed { .. }));

        let history = hedger.hedge_history("D1").await;
        assert_eq!(history.len(), 1);
        assert!(history[0].manual);
        assert!(history[0].executed());
    }

    #[tokio::test]
    async fn rejected_order_is_recorded_as_unexecuted() {
        let mock = MockBrokerClient::new();
        mock.reject_orders(Some("MARKET_CLOSED".to_string())).await;
        let hedger = hedger(&mock);
        let position = long_call("D1", "UND");

        let assessment = hedger
            .assess_position(&position, dec!(110), Some(0.2))
            .await
            .unwrap();
        let err = hedger
            .hedge_position(&position, &assessment, false)
            .await
            .unwrap_err();
        assert_eq!(err, HedgeError::BrokerRejected("MARKET_CLOSED".into()));

        let history = hedger.hedge_history("D1").await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].executed());
    }

    #[tokio::test]
    async fn batch_reports_every_position_once() {
        let mock = MockBrokerClient::new();
        mock.set_positions(vec![
            long_call("D1", "U1"),
            long_call("D2", "U2"),
            long_call("D3", "U3"),
        ])
        .await;
        seed_underlying(&mock, "U1", dec!(110)).await;
        seed_underlying(&mock, "U3", dec!(110)).await;
        mock.fail_snapshot("U2").await;

        let hedger = hedger(&mock);
        let report = hedger.hedge_all_positions(false).await.unwrap();

        assert_eq!(report.total(), 3);
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].deal_id, "D2");
        assert!(matches!(
            report.failed[0].error,
            HedgeError::MarketDataUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn explicit_size_overrides_suggestion() {
        let mock = MockBrokerClient::new();
        mock.set_positions(vec![long_call("D1", "U1")]).await;
        seed_underlying(&mock, "U1", dec!(110)).await;
        let hedger = hedger(&mock);

        let outcome = hedger
            .hedge_position_by_id("D1", Some(dec!(0.5)), false)
            .await
            .unwrap();
        match outcome {
            HedgeOutcome::Executed { size, .. } => assert_eq!(size, dec!(0.5)),
            other => panic!("expected execution, got {other:?}"),
        }

        assert!(matches!(
            hedger.hedge_position_by_id("D1", Some(dec!(0)), false).await,
            Err(HedgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            hedger.hedge_position_by_id("D9", None, true).await,
            Err(HedgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn explicit_size_does_not_bypass_threshold() {
        let mock = MockBrokerClient::new();
        let mut position = long_call("D1", "U1");
        position.size = dec!(0.01);
        mock.set_positions(vec![position]).await;
        seed_underlying(&mock, "U1", dec!(100)).await;
        let hedger = hedger(&mock);

        // Within threshold and unforced: the supplied size changes
        // nothing, the call still skips.
        let outcome = hedger
            .hedge_position_by_id("D1", Some(dec!(0.5)), false)
            .await
            .unwrap();
        assert!(matches!(outcome, HedgeOutcome::Skipped { .. }));
        assert!(mock.submitted_orders().await.is_empty());

        // Forced, the override takes effect.
        let outcome = hedger
            .hedge_position_by_id("D1", Some(dec!(0.5)), true)
            .await
            .unwrap();
        match outcome {
            HedgeOutcome::Executed { size, .. } => assert_eq!(size, dec!(0.5)),
            other => panic!("expected execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn suggested_size_follows_configured_precision() {
        let mock = MockBrokerClient::new();
        let mut settings = HedgeSettings::default();
        settings.size_precision = 3;
        let store = Arc::new(SettingsStore::new(settings).expect("valid settings"));
        let hedger = DeltaHedger::new(Arc::new(mock.clone()), store);
        let position = long_call("D1", "U1");

        let assessment = hedger
            .assess_position(&position, dec!(110), Some(0.2))
            .await
            .unwrap();
        assert!(assessment.suggested_size.scale() <= 3);
        // The order wire format carries this decimal verbatim, so the
        // configured precision is what reaches the broker.
        assert_eq!(
            assessment.suggested_size.to_string(),
            assessment.suggested_size.round_dp(3).to_string()
        );
    }

    #[tokio::test]
    async fn metrics_mark_against_entry_price() {
        let mock = MockBrokerClient::new();
        let position = long_call("D1", "U1");
        seed_underlying(&mock, "OP.D1", dec!(8)).await;
        let hedger = hedger(&mock);

        let metrics = hedger.position_metrics(&position).await.unwrap();
        assert_eq!(metrics.current_price, dec!(8));
        // Entry 5, size 2: (8 - 5) * 2.
        assert_eq!(metrics.pnl, dec!(6));
        assert_eq!(metrics.exposure, dec!(16));
    }

    #[tokio::test]
    async fn get_position_maps_missing_deal_to_not_found() {
        let mock = MockBrokerClient::new();
        mock.set_positions(vec![long_call("D1", "UND")]).await;
        let hedger = hedger(&mock);

        assert!(hedger.get_position("D1").await.is_ok());
        assert!(matches!(
            hedger.get_position("D9").await,
            Err(HedgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn summary_excludes_unpriced_positions_from_totals() {
        let mock = MockBrokerClient::new();
        mock.set_positions(vec![long_call("D1", "U1"), long_call("D2", "U2")])
            .await;
        seed_underlying(&mock, "U1", dec!(110)).await;
        mock.fail_snapshot("U2").await;

        let hedger = hedger(&mock);
        let summary = hedger.portfolio_summary().await.unwrap();
        assert_eq!(summary.position_count, 2);
        assert_eq!(summary.unpriced_positions, 1);
        assert!(summary.total_delta > 0.0);
    }
}
