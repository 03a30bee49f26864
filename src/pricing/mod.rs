//! Closed-form Black-Scholes option pricing and Greeks.
//!
//! Pure functions of their inputs: no market access, no hidden state. All
//! math is f64; money and order sizes stay in `rust_decimal` on the broker
//! side and are converted at this seam.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

/// Volatility floor applied when the input volatility is non-positive,
/// keeping the formulas finite while staying deterministic.
pub const MIN_VOLATILITY: f64 = 0.001;

/// Option contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Call,
    Put,
}

/// Per-unit option sensitivities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

impl Greeks {
    pub const ZERO: Greeks = Greeks {
        delta: 0.0,
        gamma: 0.0,
        theta: 0.0,
        vega: 0.0,
    };
}

/// Standard normal probability density.
fn norm_pdf(x: f64) -> f64 {
    (-x * x / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard normal cumulative distribution.
fn norm_cdf(x: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are valid");
    normal.cdf(x)
}

/// Compute Black-Scholes Greeks for one unit of an option.
///
/// * `s` - spot price of the underlying (> 0)
/// * `k` - strike price (> 0)
/// * `t` - time to expiry in years (>= 0)
/// * `sigma` - implied volatility (floored at [`MIN_VOLATILITY`])
/// * `rate` - risk-free rate
///
/// At `t <= 0` the option is expired: delta collapses to its intrinsic
/// direction (call: 1 in the money, else 0; put: -1 in the money, else 0)
/// and gamma, theta and vega are all zero.
pub fn calculate_greeks(
    s: f64,
    k: f64,
    t: f64,
    sigma: f64,
    option_type: OptionType,
    rate: f64,
) -> Greeks {
    if t <= 0.0 {
        return expired_greeks(s, k, option_type);
    }

    let sigma = sigma.max(MIN_VOLATILITY);
    let sqrt_t = t.sqrt();
    let vol_sqrt_t = sigma * sqrt_t;

    let d1 = ((s / k).ln() + (rate + sigma * sigma / 2.0) * t) / vol_sqrt_t;
    let d2 = d1 - vol_sqrt_t;

    let n_d1 = norm_cdf(d1);
    let pdf_d1 = norm_pdf(d1);
    let discount = (-rate * t).exp();

    let delta = match option_type {
        OptionType::Call => n_d1,
        OptionType::Put => n_d1 - 1.0,
    };
    let gamma = pdf_d1 / (s * vol_sqrt_t);
    let vega = s * pdf_d1 * sqrt_t;
    let theta = match option_type {
        OptionType::Call => {
            -s * pdf_d1 * sigma / (2.0 * sqrt_t) - rate * k * discount * norm_cdf(d2)
        }
        OptionType::Put => {
            -s * pdf_d1 * sigma / (2.0 * sqrt_t) + rate * k * discount * norm_cdf(-d2)
        }
    };

    Greeks {
        delta,
        gamma,
        theta,
        vega,
    }
}

/// Greeks at (or past) expiry: fully directional delta, nothing else left.
fn expired_greeks(s: f64, k: f64, option_type: OptionType) -> Greeks {
    let delta = match option_type {
        OptionType::Call if s > k => 1.0,
        OptionType::Put if s < k => -1.0,
        _ => 0.0,
    };
    Greeks {
        delta,
        ..Greeks::ZERO
    }
}

/// Black-Scholes fair value for one unit of an option.
pub fn option_value(s: f64, k: f64, t: f64, sigma: f64, option_type: OptionType, rate: f64) -> f64 {
    if t <= 0.0 {
        return match option_type {
            OptionType::Call => (s - k).max(0.0),
            OptionType::Put => (k - s).max(0.0),
        };
    }

    let sigma = sigma.max(MIN_VOLATILITY);
    let sqrt_t = t.sqrt();
    let d1 = ((s / k).ln() + (rate + sigma * sigma / 2.0) * t) / (sigma * sqrt_t);
    let d2 = d1 - sigma * sqrt_t;
    let discount = (-rate * t).exp();

    match option_type {
        OptionType::Call => s * norm_cdf(d1) - k * discount * norm_cdf(d2),
        OptionType::Put => k * discount * norm_cdf(-d2) - s * norm_cdf(-d1),
    }
}
