//! A monetary amount with two fractional digits.

use std::{fmt::Display, str::FromStr};

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// The largest magnitude an amount may have, in cents (99,999,999.99).
const MAX_CENTS: i64 = 9_999_999_999;

/// An amount of money stored as a whole number of cents.
///
/// Positive amounts are income and negative amounts are expenses.
/// Keeping cents as an integer means sums over many transactions are exact.
///
/// In JSON an amount is a number in dollars, e.g. `-4.5` for an expense of
/// $4.50.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    /// The amount of nothing.
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from a whole number of cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// The amount as a whole number of cents.
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Whether the amount is exactly zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    fn as_dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl TryFrom<f64> for Amount {
    type Error = Error;

    /// Convert an amount in dollars, rounding half away from zero to the
    /// nearest cent.
    ///
    /// `dollars` is rounded as the shortest decimal that reads back as the
    /// same float, so `1.005` becomes 101 cents.
    ///
    /// # Errors
    /// Returns [Error::InvalidAmount] if `dollars` is not finite or is too large.
    fn try_from(dollars: f64) -> Result<Self, Self::Error> {
        if !dollars.is_finite() {
            return Err(Error::InvalidAmount(dollars.to_string()));
        }

        dollars.to_string().parse()
    }
}

impl FromStr for Amount {
    type Err = Error;

    /// Parse a decimal number of dollars such as `-4.50`, `12` or `1.5e3`.
    ///
    /// The text is rounded exactly, half away from zero, to the nearest cent.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse_cents(text.trim())
            .map(Amount)
            .ok_or_else(|| Error::InvalidAmount(text.to_owned()))
    }
}

/// Parse decimal `text` as a whole number of cents.
///
/// Returns `None` if `text` is not a decimal number or its magnitude is
/// larger than [MAX_CENTS] once rounded.
fn parse_cents(text: &str) -> Option<i64> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, parse_exponent(exponent)?),
        None => (unsigned, 0),
    };

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let digits: Vec<u8> = whole
        .bytes()
        .chain(fraction.bytes())
        .map(|byte| byte.is_ascii_digit().then(|| byte - b'0'))
        .collect::<Option<_>>()?;

    // The number of digits in front of the decimal point once scaled to cents.
    let point = whole.len() as i64 + exponent + 2;
    let mut cents: i64 = 0;

    for position in 0..point.max(0) {
        let digit = usize::try_from(position)
            .ok()
            .and_then(|index| digits.get(index))
            .copied()
            .unwrap_or(0);

        cents = cents.checked_mul(10)?.checked_add(i64::from(digit))?;
        if cents > MAX_CENTS {
            return None;
        }
    }

    // A first dropped digit of 5 or more is at least half a cent.
    let first_dropped = usize::try_from(point)
        .ok()
        .and_then(|index| digits.get(index))
        .copied()
        .unwrap_or(0);
    if point >= 0 && first_dropped >= 5 {
        cents += 1;
    }

    if cents > MAX_CENTS {
        return None;
    }

    Some(if negative { -cents } else { cents })
}

/// Parse an exponent, clamped to a range where the result is either zero or
/// too large, so that huge exponents do not loop.
fn parse_exponent(text: &str) -> Option<i64> {
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    if unsigned.is_empty() || !unsigned.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    let significant = unsigned.trim_start_matches('0');
    let magnitude = if significant.len() > 4 {
        1_000
    } else {
        significant.parse::<i64>().unwrap_or(0).min(1_000)
    };

    Some(if text.starts_with('-') {
        -magnitude
    } else {
        magnitude
    })
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.unsigned_abs();

        write!(f, "{sign}{}.{:02}", cents / 100, cents % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_dollars())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dollars = f64::deserialize(deserializer)?;

        Amount::try_from(dollars).map_err(serde::de::Error::custom)
    }
}

impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Amount)
    }
}
