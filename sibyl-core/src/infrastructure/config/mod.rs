//! Environment-driven configuration for both node roles.

use crate::domain::signing::TrustedSet;
use crate::foundation::constants::{DEFAULT_COLLECTION_INTERVAL_SECS, DEFAULT_LISTEN_PORT, DEFAULT_RPC_PORT};
use crate::foundation::error::{OracleError, Result};
use crate::foundation::util::encoding::decode_hex_prefixed;
use log::info;
use secp256k1::SecretKey;
use std::path::PathBuf;
use std::time::Duration;

pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";
pub const BOOTSTRAP_NODE_ENV: &str = "BOOTSTRAP_NODE";
pub const TOPIC_ENV: &str = "TOPIC";
pub const TRUSTED_ADDRESSES_ENV: &str = "TRUSTED_ADDRESSES";
pub const DB_PATH_ENV: &str = "DB_PATH";
pub const RPC_PORT_ENV: &str = "RPC_PORT";
pub const TICKERS_ENV: &str = "TICKERS";
pub const DATA_COLLECTION_INTERVAL_ENV: &str = "DATA_COLLECTION_INTERVAL";
pub const DATA_STRUCTURES_PATH_ENV: &str = "DATA_STRUCTURES_PATH";
pub const LOG_FILTER_ENV: &str = "SIBYL_LOG";

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub private_key: Vec<u8>,
    pub topic: String,
    pub trusted: TrustedSet,
    pub db_path: PathBuf,
    pub rpc_port: u16,
    pub listen_port: u16,
    pub tickers: Vec<String>,
    pub collection_interval: Duration,
    pub data_structures_path: PathBuf,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        let trusted = TrustedSet::parse(&require_env(TRUSTED_ADDRESSES_ENV)?)?;
        let topic = require_env(TOPIC_ENV)?;
        let tickers = env_or(TICKERS_ENV, "SBER")
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            private_key: private_key_from_env()?,
            topic,
            trusted,
            db_path: PathBuf::from(env_or(DB_PATH_ENV, "data/rocksdb")),
            rpc_port: parse_env_or(RPC_PORT_ENV, DEFAULT_RPC_PORT),
            listen_port: DEFAULT_LISTEN_PORT,
            tickers,
            collection_interval: Duration::from_secs(parse_env_or(
                DATA_COLLECTION_INTERVAL_ENV,
                DEFAULT_COLLECTION_INTERVAL_SECS,
            )),
            data_structures_path: PathBuf::from(env_or(DATA_STRUCTURES_PATH_ENV, "config/data_structures.json")),
        })
    }
}

#[derive(Clone, Debug)]
pub struct SignerConfig {
    pub private_key: Vec<u8>,
    pub topic: String,
    pub bootstrap: Option<String>,
}

impl SignerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            private_key: private_key_from_env()?,
            topic: require_env(TOPIC_ENV)?,
            bootstrap: optional_env(BOOTSTRAP_NODE_ENV),
        })
    }
}

/// Reads `PRIVATE_KEY` or generates an ephemeral key when it is absent.
fn private_key_from_env() -> Result<Vec<u8>> {
    match optional_env(PRIVATE_KEY_ENV) {
        Some(raw) => {
            let bytes = decode_hex_prefixed(&raw).map_err(|err| OracleError::Config(format!("invalid PRIVATE_KEY: {err}")))?;
            SecretKey::from_slice(&bytes).map_err(|err| OracleError::Config(format!("invalid PRIVATE_KEY: {err}")))?;
            Ok(bytes)
        }
        None => {
            info!("no PRIVATE_KEY configured, generating an ephemeral key");
            Ok(SecretKey::new(&mut rand::thread_rng()).secret_bytes().to_vec())
        }
    }
}

fn require_env(name: &str) -> Result<String> {
    optional_env(name).ok_or_else(|| OracleError::Config(format!("{name} environment variable not set")))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    optional_env(name).and_then(|value| value.parse().ok()).unwrap_or(default)
}
