//! Wire types shared across broker implementations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order direction for hedge trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    Buy,
    Sell,
}

impl OrderDirection {
    /// The trade that unwinds this one.
    pub fn opposite(self) -> Self {
        match self {
            OrderDirection::Buy => OrderDirection::Sell,
            OrderDirection::Sell => OrderDirection::Buy,
        }
    }

    /// Signed contribution of one unit to directional exposure.
    pub fn sign(self) -> f64 {
        match self {
            OrderDirection::Buy => 1.0,
            OrderDirection::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderDirection::Buy => write!(f, "BUY"),
            OrderDirection::Sell => write!(f, "SELL"),
        }
    }
}

/// Point-in-time market data for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub epic: String,
    pub bid: Decimal,
    pub offer: Decimal,
    /// Implied volatility when the venue supplies one; callers substitute a
    /// configured default when absent.
    pub volatility: Option<f64>,
    pub update_time: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    /// Mid price between bid and offer.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.offer) / Decimal::TWO
    }
}

/// Broker acknowledgement of a submitted hedge order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealConfirmation {
    pub deal_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn direction_opposite_and_sign() {
        assert_eq!(OrderDirection::Buy.opposite(), OrderDirection::Sell);
        assert_eq!(OrderDirection::Sell.opposite(), OrderDirection::Buy);
        assert_eq!(OrderDirection::Buy.sign(), 1.0);
        assert_eq!(OrderDirection::Sell.sign(), -1.0);
    }

    #[test]
    fn snapshot_mid_price() {
        let snap = MarketSnapshot {
            epic: "OP.D.SPX.CALL".to_string(),
            bid: dec!(99.5),
            offer: dec!(100.5),
            volatility: Some(0.2),
            update_time: None,
        };
        assert_eq!(snap.mid(), dec!(100));
    }
}
