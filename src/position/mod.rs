//! Position model: immutable per-fetch snapshots plus the append-only
//! hedge-history ledger carried across ticks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::broker::OrderDirection;
use crate::pricing::OptionType;

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

/// One open option position as reported by the broker.
///
/// Constructed fresh from every position fetch; there is no cross-tick
/// identity beyond `deal_id`. Hedge history lives in [`HedgeLedger`], keyed
/// by `deal_id`, so it survives the position being rebuilt each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Broker-assigned deal identifier.
    pub deal_id: String,
    /// Instrument key of the option itself.
    pub epic: String,
    /// Instrument key traded to hedge the option's delta.
    pub underlying_epic: String,
    pub option_type: OptionType,
    pub strike: Decimal,
    pub expiry: DateTime<Utc>,
    /// Signed size: positive long, negative short.
    pub size: Decimal,
    /// Units of underlying per contract.
    pub contract_size: Decimal,
    pub entry_price: Decimal,
}

impl Position {
    /// Time to expiry in years, clamped at zero. Recomputed on every read.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (self.expiry - now).num_seconds();
        (seconds as f64 / SECONDS_PER_YEAR).max(0.0)
    }

    /// Expired positions are excluded from active hedging.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.time_to_expiry(now) <= 0.0
    }

    /// Intrinsic value of one unit at the given underlying price.
    pub fn intrinsic_value(&self, price: Decimal) -> Decimal {
        match self.option_type {
            OptionType::Call => (price - self.strike).max(Decimal::ZERO),
            OptionType::Put => (self.strike - price).max(Decimal::ZERO),
        }
    }

    /// Signed hedge-equivalent unit count: `size * contract_size`.
    pub fn scaled_units(&self) -> f64 {
        (self.size * self.contract_size).to_f64().unwrap_or(0.0)
    }
}

/// Immutable audit entry for one executed or attempted hedge trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeRecord {
    pub timestamp: DateTime<Utc>,
    pub direction: OrderDirection,
    /// Traded size, always positive.
    pub size: Decimal,
    /// Estimated position delta after the trade.
    pub resulting_delta: f64,
    /// Broker reference, or `None` when submission failed.
    pub deal_id: Option<String>,
    /// Operator-triggered rather than automatic.
    pub manual: bool,
}

impl HedgeRecord {
    pub fn executed(&self) -> bool {
        self.deal_id.is_some()
    }
}

/// Append-only hedge history per position, in causal order.
///
/// A single lock serializes appends, so a scheduled hedge and a manual hedge
/// racing on the same position cannot lose an update. Records are never
/// removed.
#[derive(Debug, Default)]
pub struct HedgeLedger {
    histories: Mutex<HashMap<String, Vec<HedgeRecord>>>,
}

impl HedgeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to a position's history.
    pub async fn append(&self, position_id: &str, record: HedgeRecord) {
        self.histories
            .lock()
            .await
            .entry(position_id.to_string())
            .or_default()
            .push(record);
    }

    /// Chronological history for one position.
    pub async fn history(&self, position_id: &str) -> Vec<HedgeRecord> {
        self.histories
            .lock()
            .await
            .get(position_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of records for one position.
    pub async fn record_count(&self, position_id: &str) -> usize {
        self.histories
            .lock()
            .await
            .get(position_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample_position(expiry: DateTime<Utc>) -> Position {
        Position {
            deal_id: "D1".to_string(),
            epic: "OP.D.SPX.CALL".to_string(),
            underlying_epic: "IX.D.SPTRD.IFS.IP".to_string(),
            option_type: OptionType::Call,
            strike: dec!(100),
            expiry,
            size: dec!(2),
            contract_size: dec!(1),
            entry_price: dec!(5),
        }
    }

    #[test]
    fn time_to_expiry_is_clamped_non_negative() {
        let now = Utc::now();
        let expired = sample_position(now - Duration::days(3));
        assert_eq!(expired.time_to_expiry(now), 0.0);
        assert!(expired.is_expired(now));

        let half_year = sample_position(now + Duration::days(183));
        let t = half_year.time_to_expiry(now);
        assert!(t > 0.49 && t < 0.52, "t={t}");
        assert!(!half_year.is_expired(now));
    }

    #[test]
    fn intrinsic_value_by_type() {
        let now = Utc::now();
        let mut position = sample_position(now + Duration::days(30));
        assert_eq!(position.intrinsic_value(dec!(110)), dec!(10));
        assert_eq!(position.intrinsic_value(dec!(90)), dec!(0));

        position.option_type = OptionType::Put;
        assert_eq!(position.intrinsic_value(dec!(90)), dec!(10));
        assert_eq!(position.intrinsic_value(dec!(110)), dec!(0));
    }

    #[tokio::test]
    async fn ledger_appends_preserve_order() {
        let ledger = HedgeLedger::new();
        for i in 0..3 {
            ledger
                .append(
                    "D1",
                    HedgeRecord {
                        timestamp: Utc::now(),
                        direction: OrderDirection::Sell,
                        size: Decimal::from(i + 1),
                        resulting_delta: 0.0,
                        deal_id: Some(format!("H{i}")),
                        manual: false,
                    },
                )
                .await;
        }

        let history = ledger.history("D1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].deal_id.as_deref(), Some("H0"));
        assert_eq!(history[2].deal_id.as_deref(), Some("H2"));
        assert_eq!(ledger.record_count("unknown").await, 0);
    }
}
