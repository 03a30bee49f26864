//! IG REST gateway client.
//!
//! Implements [`BrokerClient`] against IG's dealing API: OAuth session
//! login, position listing, market snapshots and OTC order submission.
//! Requests carry a bounded timeout; 401 responses surface as
//! `SessionExpired` so the caller can decide to re-authenticate.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::traits::BrokerClient;
use super::types::{DealConfirmation, MarketSnapshot, OrderDirection};
use crate::config::IgConfig;
use crate::error::HedgeError;
use crate::position::Position;
use crate::pricing::OptionType;

/// Authenticated session state.
#[derive(Debug, Default)]
struct Session {
    account_id: Option<String>,
    access_token: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
}

/// IG dealing API client.
pub struct IgClient {
    http: Client,
    config: IgConfig,
    session: Mutex<Session>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "accountId")]
    account_id: String,
    #[serde(rename = "oauthToken")]
    oauth_token: OauthToken,
}

#[derive(Debug, Deserialize)]
struct OauthToken {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    position: RawDeal,
    market: RawMarket,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeal {
    deal_id: String,
    direction: String,
    size: Decimal,
    level: Decimal,
    #[serde(default)]
    contract_size: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMarket {
    epic: String,
    #[serde(default)]
    instrument_type: Option<String>,
    #[serde(default)]
    strike: Option<Decimal>,
    #[serde(default)]
    expiry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarketDetailsResponse {
    snapshot: RawSnapshot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    bid: Option<Decimal>,
    offer: Option<Decimal>,
    percentage_change: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DealReferenceResponse {
    deal_reference: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
}

impl IgClient {
    /// Create a client; no network call happens until the first request.
    pub fn new(config: IgConfig) -> Result<Self, HedgeError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| HedgeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            session: Mutex::new(Session::default()),
        })
    }

    /// Authenticate and cache the OAuth token.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<(), HedgeError> {
        let url = format!("{}/session", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-IG-API-KEY", &self.config.api_key)
            .header("Version", "3")
            .json(&serde_json::json!({
                "identifier": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|e| HedgeError::Network(format!("login request failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: LoginResponse = response
                    .json()
                    .await
                    .map_err(|e| HedgeError::Network(format!("malformed login response: {e}")))?;
                let expires_in: i64 = body.oauth_token.expires_in.parse().unwrap_or(0);

                let mut session = self.session.lock().await;
                session.account_id = Some(body.account_id);
                session.access_token = Some(body.oauth_token.access_token);
                session.token_expiry = Some(Utc::now() + Duration::seconds(expires_in));
                info!("authenticated with IG gateway");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => Err(HedgeError::SessionExpired),
            status => Err(HedgeError::Network(format!(
                "login failed with status {status}"
            ))),
        }
    }

    /// Bearer token for the current session, re-authenticating when the
    /// token is absent or within 15 seconds of expiry.
    async fn auth_headers(&self) -> Result<(String, String), HedgeError> {
        let needs_login = {
            let session = self.session.lock().await;
            match (&session.access_token, session.token_expiry) {
                (Some(_), Some(expiry)) => Utc::now() + Duration::seconds(15) >= expiry,
                _ => true,
            }
        };

        if needs_login {
            debug!("IG session missing or near expiry, re-authenticating");
            self.login().await?;
        }

        let session = self.session.lock().await;
        let token = session
            .access_token
            .clone()
            .ok_or(HedgeError::SessionExpired)?;
        let account = session
            .account_id
            .clone()
            .ok_or(HedgeError::SessionExpired)?;
        Ok((token, account))
    }

    async fn error_detail(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ApiErrorBody>().await {
            Ok(body) => body
                .error_code
                .unwrap_or_else(|| format!("HTTP {status}")),
            Err(_) => format!("HTTP {status}"),
        }
    }
}

/// IG expiries come as `19-DEC-25`; settlement is taken at end of day UTC.
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%d-%b-%y").ok()?;
    let eod = NaiveTime::from_hms_opt(23, 59, 59)?;
    Some(DateTime::from_naive_utc_and_offset(date.and_time(eod), Utc))
}

fn parse_option_type(instrument_type: Option<&str>) -> OptionType {
    match instrument_type {
        Some(t) if t.to_ascii_uppercase().contains("PUT") => OptionType::Put,
        _ => OptionType::Call,
    }
}

impl RawPosition {
    fn into_record(self) -> Option<Position> {
        if self.market.epic.is_empty() {
            return None;
        }
        let expiry = self.market.expiry.as_deref().and_then(parse_expiry)?;
        // Short positions carry negative size internally.
        let size = match self.position.direction.as_str() {
            "SELL" => -self.position.size,
            _ => self.position.size,
        };

        Some(Position {
            deal_id: self.position.deal_id,
            epic: self.market.epic,
            underlying_epic: String::new(), // filled in by the caller
            option_type: parse_option_type(self.market.instrument_type.as_deref()),
            strike: self.market.strike.unwrap_or(self.position.level),
            expiry,
            size,
            contract_size: self.position.contract_size.unwrap_or(Decimal::ONE),
            entry_price: self.position.level,
        })
    }
}

#[async_trait]
impl BrokerClient for IgClient {
    #[instrument(skip(self))]
    async fn fetch_positions(&self) -> Result<Vec<Position>, HedgeError> {
        let (token, account) = self.auth_headers().await?;
        let url = format!("{}/positions", self.config.base_url);

        let response = self
            .http
            .get(&url)
            .header("X-IG-API-KEY", &self.config.api_key)
            .header("Authorization", format!("Bearer {token}"))
            .header("IG-ACCOUNT-ID", account)
            .header("Version", "1")
            .send()
            .await
            .map_err(|e| HedgeError::Network(format!("fetch positions failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: PositionsResponse = response.json().await.map_err(|e| {
                    HedgeError::Network(format!("malformed positions response: {e}"))
                })?;

                let records = body
                    .positions
                    .into_iter()
                    .filter_map(|raw| {
                        let deal_id = raw.position.deal_id.clone();
                        match raw.into_record() {
                            Some(mut record) => {
                                record.underlying_epic = self.config.underlying_epic.clone();
                                Some(record)
                            }
                            None => {
                                warn!(%deal_id, "skipping position with unparseable terms");
                                None
                            }
                        }
                    })
                    .collect();
                Ok(records)
            }
            StatusCode::UNAUTHORIZED => Err(HedgeError::SessionExpired),
            _ => Err(HedgeError::Network(Self::error_detail(response).await)),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_market_snapshot(&self, epic: &str) -> Result<MarketSnapshot, HedgeError> {
        let (token, account) = self.auth_headers().await?;
        let url = format!("{}/markets/{}", self.config.base_url, epic);

        let response = self
            .http
            .get(&url)
            .header("X-IG-API-KEY", &self.config.api_key)
            .header("Authorization", format!("Bearer {token}"))
            .header("IG-ACCOUNT-ID", account)
            .header("Version", "3")
            .send()
            .await
            .map_err(|e| HedgeError::Network(format!("fetch snapshot failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: MarketDetailsResponse = response.json().await.map_err(|e| {
                    HedgeError::MarketDataUnavailable {
                        epic: epic.to_string(),
                        detail: format!("malformed market response: {e}"),
                    }
                })?;

                let (bid, offer) = match (body.snapshot.bid, body.snapshot.offer) {
                    (Some(bid), Some(offer)) => (bid, offer),
                    _ => {
                        return Err(HedgeError::MarketDataUnavailable {
                            epic: epic.to_string(),
                            detail: "snapshot missing bid/offer".to_string(),
                        })
                    }
                };

                // IG has no implied-vol field; a daily percentage move is the
                // best available proxy and callers floor it anyway.
                let volatility = body
                    .snapshot
                    .percentage_change
                    .map(|pct| (pct / 100.0).abs());

                Ok(MarketSnapshot {
                    epic: epic.to_string(),
                    bid,
                    offer,
                    volatility,
                    update_time: Some(Utc::now()),
                })
            }
            StatusCode::UNAUTHORIZED => Err(HedgeError::SessionExpired),
            StatusCode::NOT_FOUND => Err(HedgeError::MarketDataUnavailable {
                epic: epic.to_string(),
                detail: "unknown instrument".to_string(),
            }),
            _ => Err(HedgeError::MarketDataUnavailable {
                epic: epic.to_string(),
                detail: Self::error_detail(response).await,
            }),
        }
    }

    #[instrument(skip(self))]
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

        let (token, account) = self.auth_headers().await?;
        let url = format!("{}/positions/otc", self.config.base_url);

        // The caller has already rounded to the configured precision;
        // the decimal's own representation preserves it exactly.
        let order = serde_json::json!({
            "epic": epic,
            "expiry": "-",
            "direction": direction.to_string(),
            "size": size.to_string(),
            "orderType": "MARKET",
            "currencyCode": self.config.currency_code,
            "forceOpen": true,
            "guaranteedStop": false,
            "timeInForce": "EXECUTE_AND_ELIMINATE",
        });

        debug!(%epic, %direction, %size, "submitting hedge order");

        let response = self
            .http
            .post(&url)
            .header("X-IG-API-KEY", &self.config.api_key)
            .header("Authorization", format!("Bearer {token}"))
            .header("IG-ACCOUNT-ID", account)
            .header("Version", "2")
            .json(&order)
            .send()
            .await
            .map_err(|e| HedgeError::Network(format!("order submission failed: {e}")))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let body: DealReferenceResponse = response.json().await.map_err(|e| {
                    HedgeError::BrokerRejected(format!("order accepted but unreadable: {e}"))
                })?;
                info!(deal_id = %body.deal_reference, %epic, "hedge order placed");
                Ok(DealConfirmation {
                    deal_id: body.deal_reference,
                })
            }
            StatusCode::UNAUTHORIZED => Err(HedgeError::SessionExpired),
            _ => Err(HedgeError::BrokerRejected(
                Self::error_detail(response).await,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn parses_ig_expiry_format() {
        let parsed = parse_expiry("19-DEC-25").expect("valid expiry");
        assert_eq!(parsed.date_naive().year(), 2025);
        assert_eq!(parsed.date_naive().month(), 12);
        assert_eq!(parsed.date_naive().day(), 19);
        assert!(parse_expiry("not-a-date").is_none());
    }

    #[test]
    fn infers_option_type_from_instrument() {
        assert_eq!(parse_option_type(Some("PUT_OPTION")), OptionType::Put);
        assert_eq!(parse_option_type(Some("CALL_OPTION")), OptionType::Call);
        assert_eq!(parse_option_type(None), OptionType::Call);
    }
}
