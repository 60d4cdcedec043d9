//! Typed observation schemas and the builder that turns a price into a
//! fully-formed `SignRequest`.

use crate::domain::hashes::{calculate_hash, float_to_wei, SolidityType};
use crate::domain::message::SignRequest;
use crate::foundation::error::{OracleError, Result};
use crate::foundation::util::time::unix_now_secs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub solidity_type: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DataStructure {
    pub fields: Vec<FieldDef>,
}

/// Schema file: a JSON map of structure key to field list.
pub fn load_data_structures(path: &Path) -> Result<BTreeMap<String, DataStructure>> {
    let bytes = std::fs::read(path)
        .map_err(|err| OracleError::Config(format!("failed to read data structures file {}: {err}", path.display())))?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub struct MessageFactory {
    structures: BTreeMap<String, DataStructure>,
}

impl MessageFactory {
    pub fn new(structures: BTreeMap<String, DataStructure>) -> Self {
        Self { structures }
    }

    pub fn quote_builder(&self, structure_key: &str, ticker: &str, destination_chain: u64) -> Result<QuoteMessageBuilder> {
        let structure = self
            .structures
            .get(structure_key)
            .cloned()
            .ok_or_else(|| OracleError::Config(format!("unknown structure key: {structure_key}")))?;
        Ok(QuoteMessageBuilder {
            ticker: ticker.to_string(),
            structure_key: structure_key.to_string(),
            structure,
            destination_chain,
        })
    }
}

/// Builds stock-quote observations: the data array carries the ticker, the
/// wei-scaled price as a decimal string, the destination chain id and the
/// observation timestamp, ordered by the schema.
pub struct QuoteMessageBuilder {
    ticker: String,
    structure_key: String,
    structure: DataStructure,
    destination_chain: u64,
}

impl QuoteMessageBuilder {
    pub fn build_message(&self, price: f64) -> Result<SignRequest> {
        self.build_message_at(price, unix_now_secs())
    }

    pub fn build_message_at(&self, price: f64, timestamp: i64) -> Result<SignRequest> {
        let wei = float_to_wei(price);
        let mut values: BTreeMap<&str, Value> = BTreeMap::new();
        values.insert("ticker", Value::from(self.ticker.clone()));
        values.insert("price", Value::from(wei.to_string()));
        values.insert("destination_chain", Value::from(self.destination_chain));
        values.insert("timestamp", Value::from(timestamp));

        let mut data = Vec::with_capacity(self.structure.fields.len());
        let mut data_structure = Vec::with_capacity(self.structure.fields.len());
        let mut data_structure_meta = Vec::with_capacity(self.structure.fields.len());
        for field in &self.structure.fields {
            field.solidity_type.parse::<SolidityType>()?;
            data.push(values.get(field.name.as_str()).cloned().unwrap_or(Value::Null));
            data_structure.push(field.solidity_type.clone());
            data_structure_meta.push(field.name.clone());
        }

        let hash = calculate_hash(&data, timestamp)?;
        let data_structure_id = self.structure_key.parse().unwrap_or(0);

        Ok(SignRequest { hash, data, data_structure, data_structure_meta, data_structure_id, timestamp })
    }
}
