//! Fixed-point money: minor currency units, scale 2. Never a binary float.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};

const SCALE: i64 = 100;

/// Amount of money stored as minor units (1 unit = 0.01).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Construct from minor units directly (e.g. cents, paise).
    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Construct from whole major units and minor-unit remainder, e.g. `Money::new(14, 0)` = 14.00.
    #[must_use]
    pub const fn new(major: i64, minor: i64) -> Self {
        Self(major * SCALE + minor)
    }

    /// The raw minor-unit value.
    #[must_use]
    pub const fn as_minor(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiply by an integer quantity (e.g. unit price × quantity).
    #[must_use]
    pub const fn mul_qty(self, qty: i64) -> Self {
        Self(self.0 * qty)
    }

    /// Round-half-even division by an integer divisor. Used for averages
    /// (e.g. market-average deviation in the vendor scorer) where plain
    /// truncating division would bias the result.
    #[must_use]
    pub fn div_round_half_even(self, divisor: i64) -> Self {
        if divisor == 0 {
            return Self::ZERO;
        }
        let numerator = self.0;
        let quotient = numerator / divisor;
        let remainder = numerator % divisor;
        if remainder == 0 {
            return Self(quotient);
        }
        let twice_remainder = remainder.unsigned_abs() * 2;
        let divisor_abs = divisor.unsigned_abs();
        let round_up = match twice_remainder.cmp(&divisor_abs) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => quotient % 2 != 0,
            std::cmp::Ordering::Less => false,
        };
        let sign = if (numerator < 0) != (divisor < 0) { -1 } else { 1 };
        Self(if round_up { quotient + sign } else { quotient })
    }

    /// Absolute percentage deviation from `other`, as an integer percent
    /// clamped to `[-100, 100]`. Used by the vendor scorer's price
    /// competitiveness metric.
    #[must_use]
    pub fn percent_deviation_from(self, other: Self) -> i64 {
        if other.0 == 0 {
            return 0;
        }
        let diff = self.0 - other.0;
        let pct = (diff * 100) / other.0;
        pct.clamp(-100, 100)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE as u64;
        let frac = abs % SCALE as u64;
        if negative {
            write!(f, "-{whole}.{frac:02}")
        } else {
            write!(f, "{whole}.{frac:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_two_decimals() {
        assert_eq!(Money::new(1_400, 0).to_string(), "1400.00");
        assert_eq!(Money::from_minor(50).to_string(), "0.50");
        assert_eq!(Money::from_minor(-50).to_string(), "-0.50");
    }

    #[test]
    fn mul_qty_matches_manual_total() {
        let rice = Money::new(80, 0).mul_qty(10);
        let dal = Money::new(120, 0).mul_qty(5);
        assert_eq!(rice + dal, Money::new(1_400, 0));
    }

    #[test]
    fn round_half_even_ties_to_even_quotient() {
        assert_eq!(Money::from_minor(10).div_round_half_even(4), Money::from_minor(3));
        assert_eq!(Money::from_minor(10).div_round_half_even(3), Money::from_minor(3));
    }

    #[test]
    fn percent_deviation_clamped() {
        let cheaper = Money::new(40, 0);
        let market = Money::new(100, 0);
        assert_eq!(cheaper.percent_deviation_from(market), -60_i64.clamp(-100, 100));
    }
}
