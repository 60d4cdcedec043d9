use crate::foundation::error::Result;
use crate::foundation::{DataStructureId, RequestHash};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything that travels over the gossip topic: a single JSON object with a
/// `type` discriminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    SignRequest(SignRequest),
    SignResponse(SignResponse),
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A coordinator's solicitation for signatures over a canonical hash.
///
/// Rebroadcasts from the retry path carry only the hash; every other field
/// defaults to empty, which signers tolerate because they sign the hash, not
/// the payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub hash: RequestHash,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub data_structure: Vec<String>,
    #[serde(default)]
    pub data_structure_meta: Vec<String>,
    #[serde(default)]
    pub data_structure_id: DataStructureId,
    #[serde(default)]
    pub timestamp: i64,
}

impl SignRequest {
    /// The bare form used by the rebroadcast ticker.
    pub fn rebroadcast(hash: RequestHash) -> Self {
        Self { hash, ..Self::default() }
    }

    /// Field name/value pairs in schema order.
    pub fn field_pairs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data_structure_meta.iter().map(String::as_str).zip(self.data.iter())
    }
}

/// A signer's endorsement of a hash. `peer_id` carries the signer's own
/// address claim; the coordinator trusts only the recovered address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignResponse {
    pub hash: RequestHash,
    pub signature: String,
    pub peer_id: String,
}

/// The durable representation of an observation. Stored without its
/// signature map; the map is joined from its own keyspace on read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub hash: RequestHash,
    pub data: Vec<Value>,
    pub data_structure: Vec<String>,
    pub data_structure_meta: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: BTreeMap<String, String>,
    pub timestamp: i64,
}

impl Record {
    pub fn from_request(request: &SignRequest) -> Self {
        Self {
            hash: request.hash,
            data: request.data.clone(),
            data_structure: request.data_structure.clone(),
            data_structure_meta: request.data_structure_meta.clone(),
            signatures: BTreeMap::new(),
            timestamp: request.timestamp,
        }
    }
}

/// Per-schema aggregates returned by the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureStats {
    pub id: DataStructureId,
    pub message_count: u64,
    pub last_message_time: i64,
    pub last_confirmed_time: i64,
    pub last_confirmed_hash: String,
}
