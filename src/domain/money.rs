//! Financial scalar value objects.
//!
//! All monetary math runs on `rust_decimal::Decimal` (28 significant digits)
//! so straddle costs and notional caps never pick up binary-float noise.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// A dollar amount. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    pub fn from_f64(amount: f64) -> AppResult<Self> {
        Decimal::from_f64(amount)
            .map(Money)
            .ok_or_else(|| AppError::Invalid(format!("non-finite money amount: {amount}")))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;
    fn mul(self, rhs: Decimal) -> Money {
        Money(self.0 * rhs)
    }
}

impl Div<Decimal> for Money {
    type Output = Money;
    fn div(self, rhs: Decimal) -> Money {
        Money(self.0 / rhs)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

/// Percentage bounds: -100% covers a total loss, +1000% covers extreme gains.
/// Anything outside is a data error, not a market move.
pub const MIN_PERCENTAGE: i64 = -100;
pub const MAX_PERCENTAGE: i64 = 1000;

/// A validated percentage in [-100, +1000].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percentage(Decimal);

impl Percentage {
    pub const ZERO: Percentage = Percentage(Decimal::ZERO);

    pub fn new(value: Decimal) -> AppResult<Self> {
        if value < Decimal::from(MIN_PERCENTAGE) || value > Decimal::from(MAX_PERCENTAGE) {
            return Err(AppError::Invalid(format!(
                "percentage {value} outside [{MIN_PERCENTAGE}, {MAX_PERCENTAGE}]"
            )));
        }
        Ok(Percentage(value))
    }

    pub fn from_f64(value: f64) -> AppResult<Self> {
        let d = Decimal::from_f64(value)
            .ok_or_else(|| AppError::Invalid(format!("non-finite percentage: {value}")))?;
        Percentage::new(d)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }
}

impl TryFrom<Decimal> for Percentage {
    type Error = AppError;
    fn try_from(value: Decimal) -> AppResult<Self> {
        Percentage::new(value)
    }
}

impl From<Percentage> for Decimal {
    fn from(p: Percentage) -> Decimal {
        p.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

/// An option strike price. Hashable and ordered so chains can key on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strike(Decimal);

impl Strike {
    pub fn new(price: Decimal) -> Self {
        Strike(price)
    }

    pub fn from_f64(price: f64) -> AppResult<Self> {
        Decimal::from_f64(price)
            .map(Strike)
            .ok_or_else(|| AppError::Invalid(format!("non-finite strike: {price}")))
    }

    pub fn price(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }

    /// Absolute distance to a spot price.
    pub fn distance_to(&self, spot: Money) -> Decimal {
        (self.0 - spot.amount()).abs()
    }
}

impl fmt::Display for Strike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
