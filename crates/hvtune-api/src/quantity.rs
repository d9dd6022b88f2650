//! Kubernetes-style resource quantities.
//!
//! Guest memory arrives as strings such as `1Gi`, `512Mi`, `2G` or plain byte
//! counts. Only non-negative byte amounts are meaningful here, so a
//! [`Quantity`] is a whole number of bytes; fractional byte values round up,
//! the same way the orchestration layer reports `Value()`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ApiError, Result};

const KI: u64 = 1024;
const MI: u64 = KI * 1024;
const GI: u64 = MI * 1024;

/// Binary suffixes, largest first (also used for display).
const BINARY_SUFFIXES: [(&str, u64); 6] = [
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", GI),
    ("Mi", MI),
    ("Ki", KI),
];

const DECIMAL_SUFFIXES: [(&str, u64); 6] = [
    ("E", 1_000_000_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("k", 1_000),
];

/// A non-negative amount of bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(u64);

impl Quantity {
    /// Zero bytes.
    pub const ZERO: Self = Self(0);

    /// Creates a quantity from a byte count.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Creates a quantity of `n` mebibytes.
    #[must_use]
    pub const fn mebibytes(n: u64) -> Self {
        Self(n * MI)
    }

    /// Creates a quantity of `n` gibibytes.
    #[must_use]
    pub const fn gibibytes(n: u64) -> Self {
        Self(n * GI)
    }

    /// Returns the quantity in bytes.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Returns the value in kilo (1000) units, rounded up.
    ///
    /// Guest memory is always brought to this scale before it is combined
    /// with overhead, so a quantity written as `1Gi` and one written as
    /// `1073741824` produce the same limit.
    #[must_use]
    pub const fn scaled_value_kilo(self) -> u64 {
        self.0.div_ceil(1000)
    }

    /// Rounds the quantity up to a whole number of kilo units, clamping at
    /// `u64::MAX`.
    #[must_use]
    pub const fn round_up_to_kilo(self) -> Self {
        Self(self.scaled_value_kilo().saturating_mul(1000))
    }

    /// Adds two quantities, returning `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Adds two quantities, clamping at `u64::MAX`.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Parses a quantity string.
    pub fn parse(value: &str) -> Result<Self> {
        value.parse()
    }
}

impl std::ops::Add for Quantity {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, q| acc + q)
    }
}

impl FromStr for Quantity {
    type Err = ApiError;

    fn from_str(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(ApiError::invalid_quantity(raw, "empty quantity"));
        }
        let s = s.strip_prefix('+').unwrap_or(s);
        if s.starts_with('-') {
            return Err(ApiError::invalid_quantity(raw, "must not be negative"));
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);

        let (whole, frac) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(ApiError::invalid_quantity(raw, "missing numeric value"));
        }
        if frac.contains('.') {
            return Err(ApiError::invalid_quantity(raw, "more than one decimal point"));
        }
        if frac.len() > 18 {
            return Err(ApiError::invalid_quantity(raw, "too many fractional digits"));
        }

        // value = digits / 10^frac.len(), scaled by num / den
        let digits: u128 = format!("{whole}{frac}")
            .parse()
            .map_err(|_| ApiError::invalid_quantity(raw, "value out of range"))?;
        let (num, den) = suffix_factor(suffix)
            .ok_or_else(|| ApiError::invalid_quantity(raw, format!("unknown suffix '{suffix}'")))?;
        let den = den * 10u128.pow(frac.len() as u32);

        let scaled = digits
            .checked_mul(num)
            .ok_or_else(|| ApiError::invalid_quantity(raw, "value out of range"))?;
        let bytes = scaled.div_ceil(den);
        let bytes = u64::try_from(bytes)
            .map_err(|_| ApiError::invalid_quantity(raw, "value out of range"))?;
        Ok(Self(bytes))
    }
}

/// Returns the multiplier for a suffix as a fraction `(num, den)`.
fn suffix_factor(suffix: &str) -> Option<(u128, u128)> {
    if suffix.is_empty() {
        return Some((1, 1));
    }
    if suffix == "m" {
        return Some((1, 1000));
    }
    if let Some(&(_, f)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((u128::from(f), 1));
    }
    if let Some(&(_, f)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((u128::from(f), 1));
    }
    // Decimal exponent, e.g. `1e3`.
    let exp = suffix.strip_prefix(['e', 'E'])?;
    let exp: u32 = exp.parse().ok()?;
    if exp > 18 {
        return None;
    }
    Some((10u128.pow(exp), 1))
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0");
        }
        for (suffix, factor) in BINARY_SUFFIXES {
            if self.0 % factor == 0 {
                return write!(f, "{}{}", self.0 / factor, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(bytes) => Ok(Self(bytes)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(Quantity::parse("1Gi").unwrap().bytes(), GI);
        assert_eq!(Quantity::parse("512Mi").unwrap().bytes(), 512 * MI);
        assert_eq!(Quantity::parse("4Ki").unwrap().bytes(), 4096);
    }

    #[test]
    fn test_parse_decimal_suffixes_and_plain() {
        assert_eq!(Quantity::parse("2G").unwrap().bytes(), 2_000_000_000);
        assert_eq!(Quantity::parse("100M").unwrap().bytes(), 100_000_000);
        assert_eq!(Quantity::parse("1024").unwrap().bytes(), 1024);
        assert_eq!(Quantity::parse("1e3").unwrap().bytes(), 1000);
    }

    #[test]
    fn test_parse_fraction_rounds_up() {
        assert_eq!(Quantity::parse("1.5Gi").unwrap().bytes(), GI + GI / 2);
        assert_eq!(Quantity::parse("0.5").unwrap().bytes(), 1);
        assert_eq!(Quantity::parse("100m").unwrap().bytes(), 1);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "Gi", "-1Gi", "1.2.3", "12XB", "1Gii"] {
            let err = Quantity::parse(bad).unwrap_err();
            assert!(
                matches!(err, ApiError::InvalidQuantity { .. }),
                "{bad:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_scaled_value_kilo_rounds_up() {
        let q = Quantity::gibibytes(1);
        assert_eq!(q.scaled_value_kilo(), 1_073_742);
        assert_eq!(q.round_up_to_kilo().bytes(), 1_073_742_000);
        assert_eq!(Quantity::from_bytes(2000).round_up_to_kilo().bytes(), 2000);
    }

    #[test]
    fn test_round_up_to_kilo_near_max_clamps() {
        let q: Quantity = "18446744073709551615".parse().unwrap();
        assert_eq!(q.round_up_to_kilo().bytes(), u64::MAX);
        assert_eq!(
            Quantity::from_bytes(u64::MAX - 500).round_up_to_kilo().bytes(),
            u64::MAX
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Quantity::gibibytes(2).to_string(), "2Gi");
        assert_eq!(Quantity::mebibytes(1536).to_string(), "1536Mi");
        assert_eq!(Quantity::from_bytes(1000).to_string(), "1000");
        assert_eq!(Quantity::ZERO.to_string(), "0");
    }

    #[test]
    fn test_serde_accepts_string_and_integer() {
        let q: Quantity = serde_json::from_str("\"256Mi\"").unwrap();
        assert_eq!(q, Quantity::mebibytes(256));
        let q: Quantity = serde_json::from_str("4096").unwrap();
        assert_eq!(q.bytes(), 4096);
        assert_eq!(serde_json::to_string(&q).unwrap(), "\"4Ki\"");
    }
}
