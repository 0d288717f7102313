//! Put-call IV skew and directional bias.
//!
//! Fits the slope of (put IV - call IV) against moneyness across the wings
//! of the chain. Protection demand shows up as a negative slope (bearish);
//! call speculation as a positive one (bullish).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{DirectionalBias, OptionChain, SkewAnalysis};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewConfig {
    /// ATM exclusion band: |moneyness| below this is skipped.
    pub atm_exclusion: f64,
    /// Wings beyond this |moneyness| are too far out to be informative.
    pub max_moneyness: f64,
    pub min_points: usize,
    pub threshold_neutral: f64,
    pub threshold_weak: f64,
    pub threshold_moderate: f64,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            atm_exclusion: 0.02,
            max_moneyness: 0.15,
            min_points: 5,
            threshold_neutral: 30.0,
            threshold_weak: 80.0,
            threshold_moderate: 150.0,
        }
    }
}

impl SkewConfig {
    fn bias_for_slope(&self, slope: f64) -> DirectionalBias {
        let magnitude = slope.abs();
        if magnitude <= self.threshold_neutral {
            return DirectionalBias::Neutral;
        }
        let bullish = slope > 0.0;
        if magnitude <= self.threshold_weak {
            if bullish {
                DirectionalBias::WeakBullish
            } else {
                DirectionalBias::WeakBearish
            }
        } else if magnitude <= self.threshold_moderate {
            if bullish {
                DirectionalBias::Bullish
            } else {
                DirectionalBias::Bearish
            }
        } else if bullish {
            DirectionalBias::StrongBullish
        } else {
            DirectionalBias::StrongBearish
        }
    }
}

pub fn analyze(config: &SkewConfig, chain: &OptionChain) -> AppResult<SkewAnalysis> {
    if !chain.stock_price.is_positive() {
        return Err(AppError::Invalid(format!(
            "{}: stock price must be positive for skew analysis",
            chain.ticker
        )));
    }
    let spot = chain.stock_price.as_f64();

    // One point per strike quoted on both sides with IVs, inside the band.
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (strike, call) in &chain.calls {
        let Some(put) = chain.puts.get(strike) else {
            continue;
        };
        let (Some(call_iv), Some(put_iv)) = (call.implied_volatility, put.implied_volatility)
        else {
            continue;
        };
        let moneyness = (strike.as_f64() - spot) / spot;
        if moneyness.abs() < config.atm_exclusion || moneyness.abs() > config.max_moneyness {
            continue;
        }
        xs.push(moneyness);
        ys.push(put_iv - call_iv);
    }

    if xs.len() < config.min_points {
        return Err(AppError::NoData(format!(
            "{}: {} skew points, need {}",
            chain.ticker,
            xs.len(),
            config.min_points
        )));
    }

    let (slope, intercept, r_squared) = ols(&xs, &ys);
    let bias = config.bias_for_slope(slope);

    debug!(
        ticker = %chain.ticker,
        slope = format!("{slope:.1}"),
        bias = bias.as_str(),
        points = xs.len(),
        "skew"
    );

    Ok(SkewAnalysis {
        ticker: chain.ticker.clone(),
        stock_price: chain.stock_price,
        slope_atm: slope,
        skew_atm: intercept,
        directional_bias: bias,
        bias_confidence: r_squared.clamp(0.0, 1.0),
        num_points: xs.len(),
    })
}

/// Ordinary least squares on one predictor: (slope, intercept, r-squared).
fn ols(xs: &[f64], ys: &[f64]) -> (f64, f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }

    if var_x == 0.0 {
        return (0.0, mean_y, 0.0);
    }
    let slope = cov / var_x;
    let intercept = mean_y - slope * mean_x;
    // Flat response fits exactly: a zero-variance target has no residual.
    let r_squared = if var_y == 0.0 { 1.0 } else { (cov * cov) / (var_x * var_y) };
    (slope, intercept, r_squared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Money, Strike};
    use crate::domain::options::{OptionQuote, OptionType};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    /// Chain whose (put IV - call IV) varies linearly with moneyness at
    /// `slope` IV units per moneyness unit.
    fn chain_with_slope(spot: f64, slope: f64) -> OptionChain {
        let mut calls = BTreeMap::new();
        let mut puts = BTreeMap::new();
        let base_iv = 0.30;
        let base_skew = 0.02;
        for pct in [-0.14, -0.10, -0.06, -0.03, 0.03, 0.06, 0.10, 0.14] {
            let strike = Strike::from_f64((spot * (1.0 + pct) * 100.0).round() / 100.0).unwrap();
            let skew = base_skew + slope * pct;
            let mk = |option_type, iv: f64| OptionQuote {
                strike,
                option_type,
                bid: Money::from_f64(1.0).unwrap(),
                ask: Money::from_f64(1.2).unwrap(),
                implied_volatility: Some(iv),
                open_interest: 1000,
                volume: 100,
                delta: None,
            };
            calls.insert(strike, mk(OptionType::Call, base_iv));
            puts.insert(strike, mk(OptionType::Put, base_iv + skew));
        }
        OptionChain {
            ticker: "AAPL".to_string(),
            expiration: NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(),
            stock_price: Money::from_f64(spot).unwrap(),
            calls,
            puts,
        }
    }

    #[test]
    fn flat_skew_is_neutral() {
        let analysis = analyze(&SkewConfig::default(), &chain_with_slope(150.0, 0.0)).unwrap();
        assert_eq!(analysis.directional_bias, DirectionalBias::Neutral);
        assert!(analysis.slope_atm.abs() < 1.0);
        assert!(analysis.num_points >= 5);
    }

    #[test]
    fn positive_slope_is_bullish() {
        let analysis = analyze(&SkewConfig::default(), &chain_with_slope(150.0, 100.0)).unwrap();
        assert!(analysis.directional_bias.is_bullish());
        assert!(analysis.bias_confidence > 0.9);
    }

    #[test]
    fn negative_slope_is_bearish() {
        let analysis = analyze(&SkewConfig::default(), &chain_with_slope(150.0, -100.0)).unwrap();
        assert!(analysis.directional_bias.is_bearish());
    }

    #[test]
    fn strong_threshold_crossed() {
        let analysis = analyze(&SkewConfig::default(), &chain_with_slope(150.0, 200.0)).unwrap();
        assert_eq!(analysis.directional_bias, DirectionalBias::StrongBullish);
        let analysis = analyze(&SkewConfig::default(), &chain_with_slope(150.0, -200.0)).unwrap();
        assert_eq!(analysis.directional_bias, DirectionalBias::StrongBearish);
    }

    #[test]
    fn weak_band() {
        let analysis = analyze(&SkewConfig::default(), &chain_with_slope(150.0, 50.0)).unwrap();
        assert_eq!(analysis.directional_bias, DirectionalBias::WeakBullish);
    }

    #[test]
    fn too_few_points_is_nodata() {
        let mut chain = chain_with_slope(150.0, 0.0);
        // Strip IVs from most strikes so fewer than 5 points survive.
        for (i, q) in chain.puts.values_mut().enumerate() {
            if i > 2 {
                q.implied_volatility = None;
            }
        }
        assert!(matches!(
            analyze(&SkewConfig::default(), &chain),
            Err(AppError::NoData(_))
        ));
    }

    #[test]
    fn intercept_estimates_atm_skew() {
        let analysis = analyze(&SkewConfig::default(), &chain_with_slope(150.0, 0.0)).unwrap();
        assert!((analysis.skew_atm - 0.02).abs() < 1e-6);
    }

    #[test]
    fn ols_recovers_exact_line() {
        let xs = [-0.1, -0.05, 0.05, 0.1, 0.15];
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 + 42.0 * x).collect();
        let (slope, intercept, r2) = ols(&xs, &ys);
        assert!((slope - 42.0).abs() < 1e-9);
        assert!((intercept - 3.0).abs() < 1e-9);
        assert!((r2 - 1.0).abs() < 1e-9);
    }
}
