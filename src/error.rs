//! Error taxonomy for the hedging core.
//!
//! Transient broker-side failures (`Network`, `MarketDataUnavailable`) are
//! reported and the affected unit of work is skipped; retry/backoff belongs
//! to the broker client, never to this layer. `SessionExpired` is kept
//! distinct so a front door can prompt re-authentication instead of treating
//! it as a generic failure.

use serde::Serialize;
use thiserror::Error;

/// All failures the hedging core can surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HedgeError {
    /// Caller error: bad interval, threshold, or size. Surfaced immediately.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown position id.
    #[error("position not found: {0}")]
    NotFound(String),

    /// The market data source could not supply a snapshot.
    #[error("market data unavailable for {epic}: {detail}")]
    MarketDataUnavailable { epic: String, detail: String },

    /// Transport-level failure talking to the broker.
    #[error("network error: {0}")]
    Network(String),

    /// Broker session lapsed; needs re-authentication.
    #[error("broker session expired")]
    SessionExpired,

    /// Trade submission refused; carries the broker's error detail.
    #[error("broker rejected order: {0}")]
    BrokerRejected(String),
}

impl HedgeError {
    /// Stable tag for shaping error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            HedgeError::InvalidArgument(_) => "invalid_argument",
            HedgeError::NotFound(_) => "not_found",
            HedgeError::MarketDataUnavailable { .. } => "market_data_unavailable",
            HedgeError::Network(_) => "network_error",
            HedgeError::SessionExpired => "session_expired",
            HedgeError::BrokerRejected(_) => "broker_rejected",
        }
    }

    /// True for failures that may clear on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HedgeError::MarketDataUnavailable { .. } | HedgeError::Network(_)
        )
    }
}

impl Serialize for HedgeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("HedgeError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("detail", &self.to_string())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(HedgeError::SessionExpired.kind(), "session_expired");
        assert_eq!(
            HedgeError::InvalidArgument("x".into()).kind(),
            "invalid_argument"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(HedgeError::Network("timeout".into()).is_transient());
        assert!(!HedgeError::NotFound("DEAL1".into()).is_transient());
        assert!(!HedgeError::BrokerRejected("MARKET_CLOSED".into()).is_transient());
    }

    #[test]
    fn serializes_kind_and_detail() {
        let json = serde_json::to_value(HedgeError::BrokerRejected("MARKET_CLOSED".into()))
            .expect("serializable");
        assert_eq!(json["kind"], "broker_rejected");
        assert!(json["detail"].as_str().unwrap().contains("MARKET_CLOSED"));
    }
}
