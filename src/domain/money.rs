use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fixed-point amount with two decimal places, held as minor units (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const SCALE: i64 = 100; // 2 decimal places
    pub const TARGET_DECIMALS: u32 = 2;

    pub const ZERO: Money = Money(0);

    /// Largest amount or balance the ledger holds, the range of `NUMERIC(15, 2)`.
    pub const MAX: Money = Money(999_999_999_999_999);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn as_minor(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_neg(self) -> Option<Money> {
        self.0.checked_neg().map(Money)
    }

    /// Rounds half-to-even to two places; `None` when the value does not fit.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let mut rounded =
            value.round_dp_with_strategy(Self::TARGET_DECIMALS, RoundingStrategy::MidpointNearestEven);
        rounded.rescale(Self::TARGET_DECIMALS);
        let minor = rounded.mantissa();
        if minor < i128::from(i64::MIN) || minor > i128::from(i64::MAX) {
            return None;
        }
        Some(Self(minor as i64))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, Self::TARGET_DECIMALS)
    }

    pub fn from_decimal_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        Decimal::from_str(s).ok().and_then(Self::from_decimal)
    }
}

impl FromStr for Money {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_decimal_str(s).ok_or_else(|| format!("Invalid Money format: {}", s))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let minor = self.0;
        let abs = minor.unsigned_abs();
        let int_part = abs / Self::SCALE as u64;
        let frac_part = abs % Self::SCALE as u64;
        if minor < 0 {
            write!(f, "-{}.{:02}", int_part, frac_part)
        } else {
            write!(f, "{}.{:02}", int_part, frac_part)
        }
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Money::from_decimal_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid Money format: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::Money;
    use rust_decimal::Decimal;

    #[test]
    fn bankers_round_half_even() {
        let v = Money::from_decimal_str("1.235").unwrap();
        assert_eq!(format!("{}", v), "1.24");
        let v = Money::from_decimal_str("1.245").unwrap();
        assert_eq!(format!("{}", v), "1.24");
        let v = Money::from_decimal_str("-1.235").unwrap();
        assert_eq!(format!("{}", v), "-1.24");
    }

    #[test]
    fn parses_whole_and_short_fractions() {
        assert_eq!(Money::from_decimal_str("100").unwrap().as_minor(), 10_000);
        assert_eq!(Money::from_decimal_str(" 0.5 ").unwrap().as_minor(), 50);
        assert_eq!(format!("{}", Money::from_minor(7)), "0.07");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Money::from_decimal_str("").is_none());
        assert!(Money::from_decimal_str("12.3.4").is_none());
        assert!(Money::from_decimal_str("abc").is_none());
    }

    #[test]
    fn decimal_conversion_keeps_scale() {
        let m = Money::from_minor(12_345);
        assert_eq!(m.to_decimal(), Decimal::new(12_345, 2));
        assert_eq!(Money::from_decimal(m.to_decimal()), Some(m));
    }
}
