use crate::foundation::error::OracleError;
use crate::foundation::util::encoding::parse_hex_32bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub type Hash32 = [u8; 32];

/// Numeric identifier of a data-structure schema.
pub type DataStructureId = u32;

/// Canonical keccak digest of an observation, the primary key of the whole
/// system: pending entries, stored records, signature sets and wire messages
/// all key on it. Rendered as bare lowercase hex (no `0x`) on the wire.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RequestHash(Hash32);

impl RequestHash {
    pub const fn new(value: Hash32) -> Self {
        Self(value)
    }

    pub fn as_bytes(&self) -> &Hash32 {
        &self.0
    }
}

impl From<Hash32> for RequestHash {
    fn from(value: Hash32) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::LowerHex for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str("0x")?;
        }
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for RequestHash {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(parse_hex_32bytes(s)?))
    }
}

impl Serialize for RequestHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for RequestHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            Ok(Self(Hash32::deserialize(deserializer)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trips_through_hex() {
        let hash = RequestHash::new([0xab; 32]);
        let text = hash.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<RequestHash>().unwrap(), hash);
    }

    #[test]
    fn hash_serde_uses_hex_strings() {
        let hash = RequestHash::new([7; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: RequestHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn hash_parse_accepts_prefixed_hex() {
        let hash = RequestHash::new([1; 32]);
        let prefixed = format!("0x{hash}");
        assert_eq!(prefixed.parse::<RequestHash>().unwrap(), hash);
    }

    #[test]
    fn hash_parse_rejects_wrong_length() {
        assert!("abcd".parse::<RequestHash>().is_err());
    }
}
