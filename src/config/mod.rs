//! Configuration management for the delta hedger.
//!
//! Loads settings from environment variables and config files; hedging
//! parameters live in a hot-swappable [`SettingsStore`] whose updates are
//! validated as a whole and applied atomically.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::HedgeError;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// IG gateway credentials and endpoints
    #[serde(default)]
    pub ig: IgConfig,
    /// Hedging parameters
    #[serde(default)]
    pub hedge: HedgeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgConfig {
    /// API key for the dealing gateway
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Gateway base URL (demo by default)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Instrument traded to offset option delta
    #[serde(default = "default_underlying_epic")]
    pub underlying_epic: String,
    #[serde(default = "default_currency_code")]
    pub currency_code: String,
    /// Upper bound on any single broker request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Hedging parameters; the validated unit of hot-swappable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeSettings {
    /// Seconds between monitoring ticks
    #[serde(default = "default_hedge_interval")]
    pub hedge_interval_secs: f64,
    /// Absolute position delta above which a hedge is required
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: f64,
    /// Whether the scheduler hedges breaching positions on its own
    #[serde(default = "default_auto_hedge")]
    pub auto_hedge: bool,
    /// Broker minimum tradable size; suggested hedges are floored here
    #[serde(default = "default_min_hedge_size")]
    pub min_hedge_size: Decimal,
    /// Cap on any single hedge order
    #[serde(default = "default_max_hedge_size")]
    pub max_hedge_size: Decimal,
    /// Decimal places the broker accepts on order sizes
    #[serde(default = "default_size_precision")]
    pub size_precision: u32,
    /// Risk-free rate fed into the pricing engine
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Volatility substituted when a snapshot carries none
    #[serde(default = "default_volatility")]
    pub default_volatility: f64,
    /// Floor applied to any volatility before pricing
    #[serde(default = "default_min_volatility")]
    pub min_volatility: f64,
}

fn default_base_url() -> String {
    "https://demo-api.ig.com/gateway/deal".to_string()
}

fn default_underlying_epic() -> String {
    "IX.D.SPTRD.IFS.IP".to_string()
}

fn default_currency_code() -> String {
    "GBP".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_hedge_interval() -> f64 {
    60.0
}

fn default_delta_threshold() -> f64 {
    0.05
}

fn default_auto_hedge() -> bool {
    true
}

fn default_min_hedge_size() -> Decimal {
    dec!(0.01)
}

fn default_max_hedge_size() -> Decimal {
    dec!(100)
}

fn default_size_precision() -> u32 {
    2
}

fn default_risk_free_rate() -> f64 {
    0.05
}

fn default_volatility() -> f64 {
    0.2
}

fn default_min_volatility() -> f64 {
    0.001
}

impl Default for IgConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            username: String::new(),
            password: String::new(),
            base_url: default_base_url(),
            underlying_epic: default_underlying_epic(),
            currency_code: default_currency_code(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for HedgeSettings {
    fn default() -> Self {
        Self {
            hedge_interval_secs: default_hedge_interval(),
            delta_threshold: default_delta_threshold(),
            auto_hedge: default_auto_hedge(),
            min_hedge_size: default_min_hedge_size(),
            max_hedge_size: default_max_hedge_size(),
            size_precision: default_size_precision(),
            risk_free_rate: default_risk_free_rate(),
            default_volatility: default_volatility(),
            min_volatility: default_min_volatility(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("HEDGER"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl HedgeSettings {
    /// Validate the whole candidate; a failure leaves nothing applied.
    ///
    /// Float bounds are written in negated form so NaN fails them too.
    pub fn validate(&self) -> Result<(), HedgeError> {
        if !(self.hedge_interval_secs > 0.0) || !self.hedge_interval_secs.is_finite() {
            return Err(HedgeError::InvalidArgument(
                "hedge_interval_secs must be positive and finite".into(),
            ));
        }
        if !(self.delta_threshold > 0.0) || !self.delta_threshold.is_finite() {
            return Err(HedgeError::InvalidArgument(
                "delta_threshold must be positive and finite".into(),
            ));
        }
        if self.min_hedge_size <= Decimal::ZERO {
            return Err(HedgeError::InvalidArgument(
                "min_hedge_size must be positive".into(),
            ));
        }
        if self.max_hedge_size <= self.min_hedge_size {
            return Err(HedgeError::InvalidArgument(
                "max_hedge_size must exceed min_hedge_size".into(),
            ));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(HedgeError::InvalidArgument(
                "risk_free_rate must be finite".into(),
            ));
        }
        if !(self.min_volatility > 0.0) || !self.min_volatility.is_finite() {
            return Err(HedgeError::InvalidArgument(
                "min_volatility must be positive and finite".into(),
            ));
        }
        if !(self.default_volatility >= self.min_volatility) {
            return Err(HedgeError::InvalidArgument(
                "default_volatility must be at least min_volatility".into(),
            ));
        }
        Ok(())
    }
}

/// Process-wide hedging settings with atomic, validated replacement.
///
/// Readers take a cheap clone; a tick already in progress finishes with the
/// settings it read at its start.
#[derive(Debug)]
pub struct SettingsStore {
    inner: RwLock<HedgeSettings>,
}

impl SettingsStore {
    pub fn new(settings: HedgeSettings) -> Result<Self, HedgeError> {
        settings.validate()?;
        Ok(Self {
            inner: RwLock::new(settings),
        })
    }

    /// Snapshot of the current settings.
    pub async fn current(&self) -> HedgeSettings {
        self.inner.read().await.clone()
    }

    /// Replace the whole settings set, or reject with no partial effect.
    pub async fn update(&self, candidate: HedgeSettings) -> Result<HedgeSettings, HedgeError> {
        candidate.validate()?;
        let mut guard = self.inner.write().await;
        *guard = candidate.clone();
        Ok(candidate)
    }

    /// Apply new monitoring parameters, keeping every other field.
    pub async fn reconfigure_monitoring(
        &self,
        interval_secs: f64,
        delta_threshold: f64,
    ) -> Result<HedgeSettings, HedgeError> {
        let mut candidate = self.current().await;
        candidate.hedge_interval_secs = interval_secs;
        candidate.delta_threshold = delta_threshold;
        self.update(candidate).await
    }
}
