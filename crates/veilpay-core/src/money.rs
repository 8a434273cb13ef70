//! Exact fixed-point money values.
//!
//! Amounts are stored as integer minor units (`i64`) tagged with a
//! currency code, so there is no floating point anywhere in the money
//! path. How many minor units make one major unit is currency-dependent
//! and comes from a [`CurrencyTable`] built once at startup and passed
//! where needed; there is no global registry.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PayError, Result};

/// An ISO-style currency code: 2-8 uppercase ASCII alphanumerics.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse and validate a currency code.
    ///
    /// # Errors
    ///
    /// Returns `PayError::Validation` if the code is not 2-8 uppercase
    /// ASCII alphanumeric characters.
    pub fn new(code: impl AsRef<str>) -> Result<Self> {
        let code = code.as_ref();
        let ok = (2..=8).contains(&code.len())
            && code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if ok {
            Ok(Self(code.to_string()))
        } else {
            Err(PayError::validation(format!(
                "invalid currency code: {code:?}"
            )))
        }
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.0)
    }
}

impl FromStr for Currency {
    type Err = PayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = PayError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

/// Immutable currency → decimal-places table.
///
/// Built once at process start (see the service config) and never
/// mutated afterwards, so concurrent reads need no synchronization.
#[derive(Debug, Clone)]
pub struct CurrencyTable {
    decimals: HashMap<String, u32>,
}

impl CurrencyTable {
    /// Build a table from `(code, decimal places)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `PayError::Validation` if any code is invalid.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let mut decimals = HashMap::new();
        for (code, places) in entries {
            let code = Currency::new(code)?;
            decimals.insert(code.0, places);
        }
        Ok(Self { decimals })
    }

    /// Decimal places for a currency.
    ///
    /// # Errors
    ///
    /// Returns `PayError::UnknownCurrency` for codes outside the table.
    pub fn decimals(&self, currency: &Currency) -> Result<u32> {
        self.decimals
            .get(currency.as_str())
            .copied()
            .ok_or_else(|| PayError::UnknownCurrency(currency.to_string()))
    }

    /// Whether the table knows this currency.
    #[must_use]
    pub fn contains(&self, currency: &Currency) -> bool {
        self.decimals.contains_key(currency.as_str())
    }
}

impl Default for CurrencyTable {
    /// The currencies the platform sells in out of the box.
    fn default() -> Self {
        Self::new([
            ("USD", 2),
            ("EUR", 2),
            ("RUB", 2),
            ("JPY", 0),
            ("USDT", 6),
            ("BTC", 8),
        ])
        .expect("default currency codes are valid")
    }
}

/// An exact amount of one currency, in minor units.
///
/// Every arithmetic operation returns a new value and requires both
/// operands to share a currency.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's minor units (cents, satoshi, ...).
    pub minor_units: i64,
    /// Currency tag.
    pub currency: Currency,
}

impl Money {
    /// Construct from minor units.
    #[must_use]
    pub const fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Construct from whole major units using the precision table.
    ///
    /// # Errors
    ///
    /// Returns `PayError::UnknownCurrency` for unlisted currencies and
    /// `PayError::Validation` on overflow.
    pub fn from_major(major: i64, currency: Currency, table: &CurrencyTable) -> Result<Self> {
        let places = table.decimals(&currency)?;
        let scale = 10i64
            .checked_pow(places)
            .ok_or_else(|| PayError::validation("currency precision too large"))?;
        let minor_units = major
            .checked_mul(scale)
            .ok_or_else(|| PayError::validation("amount overflow"))?;
        Ok(Self {
            minor_units,
            currency,
        })
    }

    /// Zero in the given currency.
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    fn require_same_currency(&self, other: &Self) -> Result<()> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(PayError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
            })
        }
    }

    /// Add another amount of the same currency.
    ///
    /// # Errors
    ///
    /// `PayError::CurrencyMismatch` on differing currencies,
    /// `PayError::Validation` on overflow.
    pub fn checked_add(&self, other: &Self) -> Result<Self> {
        self.require_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or_else(|| PayError::validation("amount overflow"))?;
        Ok(Self {
            minor_units,
            currency: self.currency.clone(),
        })
    }

    /// Subtract another amount of the same currency.
    ///
    /// # Errors
    ///
    /// `PayError::CurrencyMismatch` on differing currencies,
    /// `PayError::Validation` on overflow.
    pub fn checked_sub(&self, other: &Self) -> Result<Self> {
        self.require_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_sub(other.minor_units)
            .ok_or_else(|| PayError::validation("amount overflow"))?;
        Ok(Self {
            minor_units,
            currency: self.currency.clone(),
        })
    }

    /// Compare with another amount of the same currency.
    ///
    /// # Errors
    ///
    /// `PayError::CurrencyMismatch` on differing currencies.
    pub fn checked_cmp(&self, other: &Self) -> Result<Ordering> {
        self.require_same_currency(other)?;
        Ok(self.minor_units.cmp(&other.minor_units))
    }

    /// A fraction of this amount expressed in basis points, rounded
    /// half-up to the minor unit. Used for percentage fee components.
    ///
    /// # Errors
    ///
    /// `PayError::Validation` on overflow.
    pub fn percent_bps(&self, bps: u32) -> Result<Self> {
        let scaled = i128::from(self.minor_units) * i128::from(bps);
        // Round half-up in minor units; amounts are non-negative here.
        let rounded = (scaled + 5_000) / 10_000;
        let minor_units = i64::try_from(rounded)
            .map_err(|_| PayError::validation("amount overflow"))?;
        Ok(Self {
            minor_units,
            currency: self.currency.clone(),
        })
    }

    /// Render as a decimal string ("10.00", "0.00000001") using the
    /// precision table.
    ///
    /// # Errors
    ///
    /// `PayError::UnknownCurrency` for unlisted currencies.
    pub fn to_major_string(&self, table: &CurrencyTable) -> Result<String> {
        let places = table.decimals(&self.currency)?;
        if places == 0 {
            return Ok(self.minor_units.to_string());
        }
        let scale = 10i64.pow(places);
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.unsigned_abs();
        let scale = scale.unsigned_abs();
        Ok(format!(
            "{sign}{}.{:0width$}",
            abs / scale,
            abs % scale,
            width = places as usize
        ))
    }
}

impl fmt::Debug for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Money({} {})", self.minor_units, self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.minor_units, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(minor: i64) -> Money {
        Money::new(minor, Currency::new("USD").unwrap())
    }

    fn btc(minor: i64) -> Money {
        Money::new(minor, Currency::new("BTC").unwrap())
    }

    #[test]
    fn add_then_sub_is_identity() {
        let a = usd(1234);
        let b = usd(567);
        let roundtrip = a.checked_add(&b).unwrap().checked_sub(&b).unwrap();
        assert_eq!(roundtrip, a);
    }

    #[test]
    fn cross_currency_ops_always_fail() {
        let a = usd(100);
        let b = btc(100);
        assert!(matches!(
            a.checked_add(&b),
            Err(PayError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            a.checked_sub(&b),
            Err(PayError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            a.checked_cmp(&b),
            Err(PayError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn from_major_uses_precision_table() {
        let table = CurrencyTable::default();
        let ten_usd = Money::from_major(10, Currency::new("USD").unwrap(), &table).unwrap();
        assert_eq!(ten_usd.minor_units, 1000);

        let one_btc = Money::from_major(1, Currency::new("BTC").unwrap(), &table).unwrap();
        assert_eq!(one_btc.minor_units, 100_000_000);

        let jpy = Money::from_major(500, Currency::new("JPY").unwrap(), &table).unwrap();
        assert_eq!(jpy.minor_units, 500);
    }

    #[test]
    fn unknown_currency_rejected() {
        let table = CurrencyTable::default();
        let err = Money::from_major(1, Currency::new("XMR").unwrap(), &table).unwrap_err();
        assert!(matches!(err, PayError::UnknownCurrency(_)));
    }

    #[test]
    fn percent_bps_rounds_half_up() {
        // 2.5% of 10.00 USD = 0.25
        assert_eq!(usd(1000).percent_bps(250).unwrap().minor_units, 25);
        // 1.5% of 0.99 USD = 1.485 cents, rounds to 1
        assert_eq!(usd(99).percent_bps(150).unwrap().minor_units, 1);
        // 0.5% of 1 cent = 0.005 cents, rounds to 0... half-up: 0.005*10000=50 scaled
        assert_eq!(usd(1).percent_bps(50).unwrap().minor_units, 0);
    }

    #[test]
    fn to_major_string_formats_per_currency() {
        let table = CurrencyTable::default();
        assert_eq!(usd(1000).to_major_string(&table).unwrap(), "10.00");
        assert_eq!(usd(5).to_major_string(&table).unwrap(), "0.05");
        assert_eq!(btc(1).to_major_string(&table).unwrap(), "0.00000001");
        let jpy = Money::new(500, Currency::new("JPY").unwrap());
        assert_eq!(jpy.to_major_string(&table).unwrap(), "500");
    }

    #[test]
    fn invalid_currency_code_rejected() {
        assert!(Currency::new("usd").is_err());
        assert!(Currency::new("X").is_err());
        assert!(Currency::new("TOOLONGCODE").is_err());
        assert!(Currency::new("US$").is_err());
    }
}
