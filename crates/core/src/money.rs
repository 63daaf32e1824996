//! Money amounts in the smallest currency unit.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Amount in cents.
///
/// Signed so that balances (price minus deposit) can be negative when a
/// customer overpays.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Unit price times a quantity.
    pub fn times(self, quantity: i64) -> Self {
        Self(self.0.saturating_mul(quantity))
    }

    /// Gross up a cost so that `margin_bps` basis points of the result are margin.
    ///
    /// `price = cost / (1 - margin)`, rounded half-up to the cent. Returns `None`
    /// when the margin is not in `0..10_000`.
    pub fn with_margin_bps(self, margin_bps: u32) -> Option<Self> {
        if margin_bps >= 10_000 {
            return None;
        }
        let denominator = i128::from(10_000 - margin_bps);
        let numerator = i128::from(self.0) * 10_000;
        let half = denominator / 2;
        let rounded = if numerator >= 0 {
            (numerator + half) / denominator
        } else {
            (numerator - half) / denominator
        };
        i64::try_from(rounded).ok().map(Self)
    }
}

impl core::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl core::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl core::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
