//! Serde hooks for values that exceed 2^53
//!
//! Sequence numbers, request ids, fees and token amounts are stored as decimal
//! strings so that any JSON consumer (including ones backed by f64 numbers)
//! reads back the exact value.

use ethers::types::U256;
use serde::{de, Deserialize, Deserializer, Serializer};

/// Parse a decimal or `0x`-prefixed hex string into a `U256`.
pub fn parse_u256(s: &str) -> Option<U256> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return None;
        }
        U256::from_str_radix(hex, 16).ok()
    } else {
        U256::from_dec_str(s).ok()
    }
}

/// Parse a signed integer in decimal or (optionally negative) hex notation.
pub fn parse_i64(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = match body.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => body.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

/// `#[serde(with = "codec::u256_dec")]`
pub mod u256_dec {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = NumberOrString::deserialize(deserializer)?;
        raw.into_u256().map_err(de::Error::custom)
    }
}

/// `#[serde(with = "codec::opt_u256_dec")]`
pub mod opt_u256_dec {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let raw = Option::<NumberOrString>::deserialize(deserializer)?;
        raw.map(|r| r.into_u256().map_err(de::Error::custom))
            .transpose()
    }
}

/// Accepts both `"123"` and `123`; the latter only exists in records written
/// by hand and is only exact below 2^64.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    String(String),
    Number(u64),
}

impl NumberOrString {
    fn into_u256(self) -> Result<U256, String> {
        match self {
            NumberOrString::Number(n) => Ok(U256::from(n)),
            NumberOrString::String(s) => {
                parse_u256(&s).ok_or_else(|| format!("invalid integer string: {:?}", s))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Amounts {
        #[serde(with = "u256_dec")]
        fee: U256,
        #[serde(with = "opt_u256_dec", default)]
        refund: Option<U256>,
    }

    #[test]
    fn test_parse_u256_hex_and_decimal() {
        assert_eq!(parse_u256("0x2a"), Some(U256::from(42)));
        assert_eq!(parse_u256("42"), Some(U256::from(42)));
        assert_eq!(parse_u256("0x"), None);
        assert_eq!(parse_u256("forty-two"), None);
    }

    #[test]
    fn test_parse_i64_negative_hex() {
        assert_eq!(parse_i64("-0x1"), Some(-1));
        assert_eq!(parse_i64("0x1"), Some(1));
        assert_eq!(parse_i64("0"), Some(0));
        assert_eq!(parse_i64("-3"), Some(-3));
    }

    #[test]
    fn test_amounts_are_written_as_strings() {
        let amounts = Amounts {
            fee: U256::exp10(30),
            refund: None,
        };
        let json = serde_json::to_value(&amounts).unwrap();
        assert_eq!(json["fee"], "1000000000000000000000000000000");

        let back: Amounts = serde_json::from_value(json).unwrap();
        assert_eq!(back, amounts);
    }

    #[test]
    fn test_numeric_input_is_accepted() {
        let back: Amounts = serde_json::from_str(r#"{"fee": 12, "refund": "0x10"}"#).unwrap();
        assert_eq!(back.fee, U256::from(12));
        assert_eq!(back.refund, Some(U256::from(16)));
    }
}
