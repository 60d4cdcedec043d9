//! Recoverable secp256k1 signing and the trusted-signer set.

use crate::domain::hashes::keccak256;
use crate::foundation::error::{OracleError, Result};
use crate::foundation::util::encoding::decode_hex_prefixed;
use crate::foundation::Hash32;
use alloy_primitives::Address;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use std::sync::OnceLock;

const SIGNATURE_LEN: usize = 65;

fn secp() -> &'static Secp256k1<All> {
    static CONTEXT: OnceLock<Secp256k1<All>> = OnceLock::new();
    CONTEXT.get_or_init(Secp256k1::new)
}

/// Ethereum address of a public key: the low 20 bytes of the keccak digest
/// of the uncompressed point without its 0x04 tag.
pub fn address_of(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    Address::from_slice(&digest[12..])
}

/// An in-memory signing key. Signatures are the 65-byte `r || s || v` form
/// with the raw recovery id as the final byte, hex-encoded with a `0x`
/// prefix.
pub struct EthSigner {
    secret: SecretKey,
    address: Address,
}

impl EthSigner {
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)?;
        let address = address_of(&secret.public_key(secp()));
        Ok(Self { secret, address })
    }

    pub fn random() -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        let address = address_of(&secret.public_key(secp()));
        Self { secret, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign_digest(&self, digest: &Hash32) -> String {
        let message = Message::from_digest(*digest);
        let signature = secp().sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&compact);
        bytes[64] = recovery_id.to_i32() as u8;
        format!("0x{}", hex::encode(bytes))
    }
}

/// Recovers the signing address from a 65-byte hex signature over `digest`.
pub fn recover_signer(digest: &Hash32, signature_hex: &str) -> Result<Address> {
    let bytes = decode_hex_prefixed(signature_hex)?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(OracleError::Parse(format!("invalid signature length, expected 65 got {}", bytes.len())));
    }
    let recovery_id = RecoveryId::from_i32(i32::from(bytes[64]))?;
    let signature = RecoverableSignature::from_compact(&bytes[..64], recovery_id)?;
    let message = Message::from_digest(*digest);
    let public_key = secp().recover_ecdsa(&message, &signature)?;
    Ok(address_of(&public_key))
}

/// The configured signer set. Immutable at runtime; its size is the quorum
/// denominator.
#[derive(Clone, Debug)]
pub struct TrustedSet {
    addresses: Vec<Address>,
}

impl TrustedSet {
    pub fn new(addresses: Vec<Address>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(OracleError::Config("trusted signer set is empty".to_string()));
        }
        Ok(Self { addresses })
    }

    /// Parses a comma-separated address list. Every entry must be a valid
    /// address; hex case is irrelevant once parsed.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut addresses = Vec::new();
        for entry in raw.split(',') {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                continue;
            }
            let address = trimmed
                .parse::<Address>()
                .map_err(|err| OracleError::Config(format!("invalid trusted address {trimmed}: {err}")))?;
            addresses.push(address);
        }
        Self::new(addresses)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// `floor(n / 2) + 1` distinct signatures confirm a hash.
    pub fn threshold(&self) -> usize {
        self.addresses.len() / 2 + 1
    }
}
