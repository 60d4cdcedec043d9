mod rocks;

pub use rocks::RocksStore;

use crate::domain::message::{Record, SignRequest, StructureStats};
use crate::foundation::error::Result;
use crate::foundation::{DataStructureId, RequestHash};
use alloy_primitives::Address;
use std::collections::BTreeMap;

/// The coordinator's persistent view: records keyed by canonical hash, a
/// signature set per hash, and composite indices for latest/by-field/paged
/// queries. Records are append-only; only their signature maps grow.
pub trait Store: Send + Sync {
    /// Persists the record and writes its schema entry (once per id), its
    /// time-index entry and one field-index entry per data field.
    fn store_data(&self, request: &SignRequest) -> Result<()>;

    /// Inserts or replaces the signature for `signer` under `hash`.
    fn store_signature(&self, hash: &RequestHash, signer: &Address, signature: &str) -> Result<()>;

    /// The record for a hash, with its signature map joined.
    fn get_data(&self, hash: &RequestHash) -> Result<Option<Record>>;

    /// The signature map for a hash, if one was ever stored.
    fn get_signatures(&self, hash: &RequestHash) -> Result<Option<BTreeMap<String, String>>>;

    /// Records of a schema, newest first. `page < 1` reads as 1; `limit`
    /// outside `[1, 100]` reads as 10.
    fn get_all_messages(&self, ds_id: DataStructureId, page: usize, limit: usize) -> Result<Vec<Record>>;

    /// The newest decodable record of a schema, present only when it also
    /// has a stored signature map.
    fn get_latest_message(&self, ds_id: DataStructureId) -> Result<Option<Record>>;

    /// Records matching one field value, sorted newest first. Skips
    /// `page * limit` joinable entries before collecting.
    fn get_messages_by_field(
        &self,
        ds_id: DataStructureId,
        field: &str,
        value: &str,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Record>>;

    /// The newest record matching a field value whose signature count meets
    /// `threshold`.
    fn get_latest_by_field(
        &self,
        ds_id: DataStructureId,
        threshold: usize,
        field: &str,
        value: &str,
    ) -> Result<Option<Record>>;

    /// The newest record of a schema whose signature count meets
    /// `threshold`.
    fn get_latest_confirmed(&self, ds_id: DataStructureId, threshold: usize) -> Result<Option<Record>>;

    /// Every schema id ever written.
    fn get_data_structures(&self) -> Result<Vec<DataStructureId>>;

    fn get_structure_stats(&self, ds_id: DataStructureId, threshold: usize) -> Result<StructureStats>;

    /// Forces buffered writes to disk; called on shutdown.
    fn flush(&self) -> Result<()>;
}
