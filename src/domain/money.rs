// Copyright (c) 2025 - Cowboy AI, Inc.
//! Money and Percentage Value Objects
//!
//! Amounts are fixed-point decimals with four fractional digits stored in an
//! `i64`, so sums over the event log are exact and a rebuild always lands on
//! the same totals as the incremental path. Commission results are rounded to
//! the configured precision with half-away-from-zero rounding.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits carried by [`Money`]
pub const MONEY_DECIMALS: u32 = 4;

const SCALE: i64 = 10_i64.pow(MONEY_DECIMALS);

/// Basis points in 100 %
const FULL_PERCENT_BPS: i64 = 10_000;

/// Errors raised when parsing amounts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Invalid amount '{0}'")]
    Invalid(String),

    #[error("Amount '{0}' has more than four decimal places")]
    TooPrecise(String),

    #[error("Amount '{0}' is out of range")]
    OutOfRange(String),
}

/// Fixed-point monetary amount (four decimal places)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr", into = "String")]
pub struct Money(i64);

impl Money {
    /// Zero amount
    pub const ZERO: Money = Money(0);

    /// Build from raw ten-thousandths
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// Largest amount or revenue an inbound event may carry
    /// (one trillion whole units)
    pub const MAX_EVENT_AMOUNT: Money = Money(1_000_000_000_000 * SCALE);

    /// Build from a whole number, saturating at the `i64` range
    pub const fn from_whole(value: i64) -> Self {
        Self(value.saturating_mul(SCALE))
    }

    /// Build from a whole number, `None` when it does not fit
    pub fn checked_from_whole(value: i64) -> Option<Self> {
        value.checked_mul(SCALE).map(Money)
    }

    /// Raw ten-thousandths
    pub const fn units(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    /// Round to `precision` decimal places, half away from zero
    ///
    /// Precision above [`MONEY_DECIMALS`] leaves the amount untouched.
    /// `None` when rounding would leave the `i64` range.
    pub fn checked_round_to(self, precision: u32) -> Option<Money> {
        if precision >= MONEY_DECIMALS {
            return Some(self);
        }
        let step = 10_i64.pow(MONEY_DECIMALS - precision);
        let half = step / 2;
        let shifted = if self.0 >= 0 {
            self.0.checked_add(half)?
        } else {
            self.0.checked_sub(half)?
        };
        Some(Money(shifted / step * step))
    }

    /// Apply a percentage without rounding
    pub fn percent(self, pct: Percentage) -> Money {
        let raw = i128::from(self.0) * i128::from(pct.basis_points()) / i128::from(FULL_PERCENT_BPS);
        Money(raw.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE as u64;
        let frac = format!("{:04}", abs % SCALE as u64);
        // keep at least two fractional digits
        let trimmed = frac.trim_end_matches('0');
        let frac = if trimmed.len() < 2 { &frac[..2] } else { trimmed };
        write!(f, "{}{}.{}", sign, whole, frac)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let (negative, digits) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input.strip_prefix('+').unwrap_or(input)),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(MoneyError::Invalid(s.to_string()));
        }
        if frac.len() > MONEY_DECIMALS as usize {
            return Err(MoneyError::TooPrecise(s.to_string()));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| MoneyError::OutOfRange(s.to_string()))?
        };
        let frac_units: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = MONEY_DECIMALS as usize);
            padded
                .parse()
                .map_err(|_| MoneyError::Invalid(s.to_string()))?
        };

        let units = whole
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(frac_units))
            .ok_or_else(|| MoneyError::OutOfRange(s.to_string()))?;

        Ok(Money(if negative { -units } else { units }))
    }
}

/// Wire forms accepted for amounts: decimal strings or JSON numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum MoneyRepr {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl TryFrom<MoneyRepr> for Money {
    type Error = MoneyError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        match repr {
            MoneyRepr::Text(s) => s.parse(),
            MoneyRepr::Integer(n) => n
                .checked_mul(SCALE)
                .map(Money)
                .ok_or_else(|| MoneyError::OutOfRange(n.to_string())),
            MoneyRepr::Float(x) => format!("{:.4}", x).parse(),
        }
    }
}

impl From<Money> for String {
    fn from(money: Money) -> Self {
        money.to_string()
    }
}

/// Commission percentage in hundredths of a percent (basis points)
///
/// Always within `[0.01 %, 100 %]`; construction clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Money", into = "Money")]
pub struct Percentage(u16);

impl Percentage {
    /// Smallest configurable percentage (0.01 %)
    pub const MIN: Percentage = Percentage(1);

    /// Largest configurable percentage (100 %)
    pub const MAX: Percentage = Percentage(FULL_PERCENT_BPS as u16);

    /// Build from basis points, clamped into range
    pub fn from_basis_points(bps: i64) -> Self {
        let clamped = bps.clamp(Self::MIN.0 as i64, Self::MAX.0 as i64);
        if clamped != bps {
            tracing::debug!(requested = bps, clamped, "percentage clamped into range");
        }
        Percentage(clamped as u16)
    }

    /// Build from a percent value expressed as an amount (`15` means 15 %)
    pub fn from_percent(value: Money) -> Self {
        // one basis point is 100 money units
        Self::from_basis_points(value.units() / 100)
    }

    pub fn basis_points(&self) -> u16 {
        self.0
    }

    /// Percent value as an amount (`1500` bps becomes `15.00`)
    pub fn as_percent(&self) -> Money {
        Money::from_units(i64::from(self.0) * 100)
    }
}

impl From<Money> for Percentage {
    fn from(value: Money) -> Self {
        Percentage::from_percent(value)
    }
}

impl From<Percentage> for Money {
    fn from(pct: Percentage) -> Self {
        pct.as_percent()
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percent())
    }
}
