//! Fixed-point reward amounts
//!
//! Ledger rewards are 18-decimal tokens. They are kept as integer base units
//! and travel as decimal strings, never as floats.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Fractional digits of one whole token
pub const DECIMALS: u32 = 18;
const ONE: u128 = 10u128.pow(DECIMALS);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(u128);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,
    #[error("Invalid amount: {0}")]
    Invalid(String),
    #[error("Amount has more than {DECIMALS} decimal places")]
    TooPrecise,
    #[error("Amount overflows")]
    Overflow,
}

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    pub fn from_whole(tokens: u64) -> Self {
        Self(tokens as u128 * ONE)
    }

    pub fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(other.0).map(TokenAmount)
    }

    pub fn saturating_add(self, other: TokenAmount) -> TokenAmount {
        TokenAmount(self.0.saturating_add(other.0))
    }

    /// Parse a non-negative decimal string such as `"1.5"` or `"20"`
    pub fn parse(raw: &str) -> Result<Self, AmountError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        if frac.len() > DECIMALS as usize {
            return Err(AmountError::TooPrecise);
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u128>()
                .map_err(|_| AmountError::Overflow)?
                .checked_mul(ONE)
                .ok_or(AmountError::Overflow)?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let scale = 10u128.pow(DECIMALS - frac.len() as u32);
            frac.parse::<u128>().map_err(|_| AmountError::Overflow)? * scale
        };

        whole_units
            .checked_add(frac_units)
            .map(TokenAmount)
            .ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / ONE;
        let frac = self.0 % ONE;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{frac:018}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for TokenAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenAmount::parse(s)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(TokenAmount::parse("1.5").unwrap().to_string(), "1.5");
        assert_eq!(TokenAmount::parse("20").unwrap(), TokenAmount::from_whole(20));
        assert_eq!(TokenAmount::parse(".25").unwrap().to_string(), "0.25");
        assert_eq!(TokenAmount::parse("3.").unwrap().to_string(), "3");
        assert_eq!(TokenAmount::ZERO.to_string(), "0");
        assert_eq!(
            TokenAmount::parse("0.000000000000000001").unwrap().base_units(),
            1
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(TokenAmount::parse(""), Err(AmountError::Empty));
        assert!(matches!(TokenAmount::parse("-1"), Err(AmountError::Invalid(_))));
        assert!(matches!(TokenAmount::parse("1e3"), Err(AmountError::Invalid(_))));
        assert!(matches!(TokenAmount::parse("."), Err(AmountError::Invalid(_))));
        assert_eq!(
            TokenAmount::parse("0.0000000000000000001"),
            Err(AmountError::TooPrecise)
        );
        assert_eq!(
            TokenAmount::parse("999999999999999999999999999999999999999"),
            Err(AmountError::Overflow)
        );
    }

    #[test]
    fn test_addition() {
        let a = TokenAmount::parse("1.25").unwrap();
        let b = TokenAmount::parse("0.75").unwrap();
        assert_eq!(a.saturating_add(b), TokenAmount::from_whole(2));
        assert!(TokenAmount::from_base_units(u128::MAX)
            .checked_add(TokenAmount::from_base_units(1))
            .is_none());
    }

    #[test]
    fn test_serde_as_string() {
        let amount = TokenAmount::parse("1.5").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1.5\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
        assert!(serde_json::from_str::<TokenAmount>("\"abc\"").is_err());
    }
}
