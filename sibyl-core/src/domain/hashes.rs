//! Canonical digest construction shared with the on-chain verifier.
//!
//! The record hash is `keccak256(abi.encodePacked(json(data), uint256(ts)))`
//! and the digest signers actually sign is the Ethereum text-hash of those
//! 32 bytes. Both constructions must stay byte-identical to the contract
//! side; nothing here may depend on locale, map ordering or float formatting.

use crate::foundation::error::{OracleError, Result};
use crate::foundation::{Hash32, RequestHash};
use alloy_primitives::{Address, U256};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::str::FromStr;

pub fn keccak256(bytes: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Solidity type names the packed encoder understands. Anything else in a
/// schema is a configuration error surfaced as `UnsupportedType`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SolidityType {
    String,
    Uint256,
    Uint64,
    Bytes32,
    Address,
}

impl FromStr for SolidityType {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(SolidityType::String),
            "uint256" => Ok(SolidityType::Uint256),
            "uint64" => Ok(SolidityType::Uint64),
            "bytes32" => Ok(SolidityType::Bytes32),
            "address" => Ok(SolidityType::Address),
            other => Err(OracleError::UnsupportedType(other.to_string())),
        }
    }
}

/// A value paired with its packed-encoding rule.
#[derive(Clone, Debug)]
pub enum PackedValue {
    Str(String),
    Uint256(U256),
    Uint64(u64),
    Bytes32(Hash32),
    Addr(Address),
}

/// `abi.encodePacked` semantics: strings are raw UTF-8 with no length
/// prefix, integers are 32-byte big-endian left-padded, `bytes32` verbatim,
/// addresses left-padded to 32 bytes.
pub fn abi_encode_packed(values: &[PackedValue]) -> Vec<u8> {
    let mut packed = Vec::new();
    for value in values {
        match value {
            PackedValue::Str(s) => packed.extend_from_slice(s.as_bytes()),
            PackedValue::Uint256(n) => packed.extend_from_slice(&n.to_be_bytes::<32>()),
            PackedValue::Uint64(n) => {
                packed.extend_from_slice(&[0u8; 24]);
                packed.extend_from_slice(&n.to_be_bytes());
            }
            PackedValue::Bytes32(b) => packed.extend_from_slice(b),
            PackedValue::Addr(a) => {
                packed.extend_from_slice(&[0u8; 12]);
                packed.extend_from_slice(a.as_slice());
            }
        }
    }
    packed
}

pub fn solidity_keccak256(values: &[PackedValue]) -> Hash32 {
    keccak256(&abi_encode_packed(values))
}

/// The canonical record hash over an ordered data array and its timestamp.
pub fn calculate_hash(data: &[Value], timestamp: i64) -> Result<RequestHash> {
    let json = serde_json::to_string(data)?;
    let seconds =
        u64::try_from(timestamp).map_err(|_| OracleError::Parse(format!("negative timestamp: {timestamp}")))?;
    let digest = solidity_keccak256(&[PackedValue::Str(json), PackedValue::Uint256(U256::from(seconds))]);
    Ok(RequestHash::new(digest))
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len || payload)`.
/// Domain-separates signer messages from arbitrary payloads and matches the
/// on-chain `ecrecover` path.
pub fn text_hash(payload: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", payload.len()).as_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

/// `floor(price * 10^18)`. Consumers expect prices already scaled to wei;
/// the `u128` intermediate is exact for anything a `f64` can carry.
pub fn float_to_wei(price: f64) -> U256 {
    if !price.is_finite() || price <= 0.0 {
        return U256::ZERO;
    }
    U256::from((price * 1e18).floor() as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_string_is_raw_bytes() {
        assert_eq!(abi_encode_packed(&[PackedValue::Str("abc".into())]), b"abc".to_vec());
    }

    #[test]
    fn packed_uint256_is_left_padded_big_endian() {
        let encoded = abi_encode_packed(&[PackedValue::Uint256(U256::from(0x0102u64))]);
        let mut expected = vec![0u8; 30];
        expected.extend_from_slice(&[0x01, 0x02]);
        assert_eq!(encoded, expected);
    }

    #[test]
    fn packed_uint64_widens_to_32_bytes() {
        let encoded = abi_encode_packed(&[PackedValue::Uint64(1)]);
        assert_eq!(encoded.len(), 32);
        assert_eq!(encoded[31], 1);
        assert!(encoded[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn packed_address_is_left_padded() {
        let addr = Address::from_slice(&[0x11; 20]);
        let encoded = abi_encode_packed(&[PackedValue::Addr(addr)]);
        assert_eq!(encoded.len(), 32);
        assert!(encoded[..12].iter().all(|b| *b == 0));
        assert_eq!(&encoded[12..], &[0x11; 20]);
    }

    #[test]
    fn packed_bytes32_is_verbatim() {
        let encoded = abi_encode_packed(&[PackedValue::Bytes32([5; 32])]);
        assert_eq!(encoded, vec![5; 32]);
    }

    #[test]
    fn unknown_type_names_are_rejected() {
        assert!(matches!("uint128".parse::<SolidityType>(), Err(OracleError::UnsupportedType(_))));
        assert!("uint256".parse::<SolidityType>().is_ok());
    }

    #[test]
    fn calculate_hash_matches_manual_preimage() {
        let data = vec![Value::from("SBER"), Value::from("300000000000000000000"), Value::from(1), Value::from(1_700_000_000i64)];
        let timestamp = 1_700_000_000i64;

        let hash = calculate_hash(&data, timestamp).unwrap();

        let mut preimage = serde_json::to_string(&data).unwrap().into_bytes();
        preimage.extend_from_slice(&U256::from(timestamp as u64).to_be_bytes::<32>());
        assert_eq!(*hash.as_bytes(), keccak256(&preimage));
    }

    #[test]
    fn calculate_hash_is_sensitive_to_order_and_time() {
        let a = vec![Value::from("x"), Value::from("y")];
        let b = vec![Value::from("y"), Value::from("x")];
        assert_ne!(calculate_hash(&a, 10).unwrap(), calculate_hash(&b, 10).unwrap());
        assert_ne!(calculate_hash(&a, 10).unwrap(), calculate_hash(&a, 11).unwrap());
        assert_eq!(calculate_hash(&a, 10).unwrap(), calculate_hash(&a, 10).unwrap());
    }

    #[test]
    fn text_hash_prepends_the_signed_message_header() {
        let payload = [0xaau8; 32];
        let mut preimage = b"\x19Ethereum Signed Message:\n32".to_vec();
        preimage.extend_from_slice(&payload);
        assert_eq!(text_hash(&payload), keccak256(&preimage));
    }

    #[test]
    fn float_to_wei_scales_and_floors() {
        assert_eq!(float_to_wei(1.0), U256::from(10u128.pow(18)));
        assert_eq!(float_to_wei(300.5), U256::from(3005u128 * 10u128.pow(17)));
        assert_eq!(float_to_wei(0.0), U256::ZERO);
        assert_eq!(float_to_wei(-2.0), U256::ZERO);
        assert_eq!(float_to_wei(f64::NAN), U256::ZERO);
    }
}
