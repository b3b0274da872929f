//! Serde adapter: u128 token amounts as decimal strings.
//!
//! JSON numbers cannot carry the full u128 range, so amounts always travel as
//! strings. Plain numbers are still accepted on input.

use serde::{de, Deserialize, Deserializer, Serializer};

/// Integer token amount in the ledger's smallest unit.
pub type Amount = u128;

pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
        Raw::Number(n) => Ok(n as Amount),
    }
}

#[cfg(test)]
mod tests {
    use super::Amount;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Stake {
        #[serde(with = "super")]
        value: Amount,
    }

    #[test]
    fn large_amounts_survive_json() {
        let big = Stake {
            value: 340_282_366_920_938_463_463_374_607_431_768_211_455,
        };
        let json = serde_json::to_string(&big).unwrap();
        assert_eq!(json, r#"{"value":"340282366920938463463374607431768211455"}"#);
        let back: Stake = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, big.value);
    }

    #[test]
    fn plain_numbers_are_accepted() {
        let s: Stake = serde_json::from_str(r#"{"value": 42}"#).unwrap();
        assert_eq!(s.value, 42);
    }
}
