use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("untrusted signer: {0}")]
    UnknownSigner(String),

    #[error("no pending request for hash {0}")]
    UnknownHash(String),

    #[error("storage error during {operation}: {details}")]
    Storage { operation: String, details: String },

    #[error("{format} serialization error: {details}")]
    Serialization { format: String, details: String },

    #[error("transport error during {operation}: {details}")]
    Transport { operation: String, details: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no valid prices received from any source")]
    NoPriceAvailable,

    #[error("unsupported solidity type: {0}")]
    UnsupportedType(String),

    #[error("crypto error during {operation}: {details}")]
    Crypto { operation: String, details: String },

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, OracleError>;

impl From<hex::FromHexError> for OracleError {
    fn from(err: hex::FromHexError) -> Self {
        OracleError::Parse(format!("invalid hex: {err}"))
    }
}

impl From<serde_json::Error> for OracleError {
    fn from(err: serde_json::Error) -> Self {
        OracleError::Serialization { format: "json".to_string(), details: err.to_string() }
    }
}

impl From<rocksdb::Error> for OracleError {
    fn from(err: rocksdb::Error) -> Self {
        OracleError::Storage { operation: "rocksdb".to_string(), details: err.to_string() }
    }
}

impl From<io::Error> for OracleError {
    fn from(err: io::Error) -> Self {
        OracleError::Storage { operation: "io".to_string(), details: err.to_string() }
    }
}

impl From<secp256k1::Error> for OracleError {
    fn from(err: secp256k1::Error) -> Self {
        OracleError::Crypto { operation: "secp256k1".to_string(), details: err.to_string() }
    }
}

#[macro_export]
macro_rules! storage_err {
    ($op:expr, $err:expr) => {
        $crate::foundation::OracleError::Storage { operation: $op.into(), details: $err.to_string() }
    };
}
