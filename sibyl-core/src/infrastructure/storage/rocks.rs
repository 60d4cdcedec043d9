//! RocksDB-backed store.
//!
//! One column family per namespace: records by hash, signature maps by hash,
//! schemas by id, and two index families. Time-index keys are
//! `ds_id(4, BE) || timestamp(8, BE) || hash(32)` so lexicographic order is
//! chronological; field-index keys are
//! `ds_id(4, BE) || field || ':' || value || ':' || hash(32)`.
//!
//! Writes are serialized through a single mutex because the signature map is
//! rewritten whole on every append and a record write spans several keys.
//! Reads rely on RocksDB's per-key atomicity and take no lock. A crash
//! between the keys of one record write can leave an index entry with no
//! record row; readers skip entries that do not join.

use crate::domain::message::{Record, SignRequest, StructureStats};
use crate::foundation::error::Result;
use crate::foundation::{DataStructureId, RequestHash};
use crate::storage_err;
use alloy_primitives::Address;
use log::{debug, trace};
use rocksdb::{ColumnFamily, DBIteratorWithThreadMode, Direction, IteratorMode, Options, DB};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::Store;

const CF_RECORD: &str = "record";
const CF_SIGNATURE: &str = "signature";
const CF_SCHEMA: &str = "schema";
const CF_TIME_INDEX: &str = "time_index";
const CF_FIELD_INDEX: &str = "field_index";

const COLUMN_FAMILIES: [&str; 5] = [CF_RECORD, CF_SIGNATURE, CF_SCHEMA, CF_TIME_INDEX, CF_FIELD_INDEX];

const HASH_LEN: usize = 32;
const TIME_INDEX_KEY_LEN: usize = 4 + 8 + HASH_LEN;

pub struct RocksStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksStore {
    pub fn open(path: &Path) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let db = DB::open_cf(&options, path, COLUMN_FAMILIES)
            .map_err(|err| storage_err!("open", format!("{}: {err}", path.display())))?;
        Ok(Self { db, write_lock: Mutex::new(()) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| storage_err!("cf_handle", format!("missing column family {name}")))
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| storage_err!("write_lock", "poisoned"))
    }

    /// Record row without its signature map; `None` when absent or
    /// undecodable.
    fn record_at(&self, hash: &RequestHash) -> Result<Option<Record>> {
        let bytes = self.db.get_cf(self.cf(CF_RECORD)?, hash.as_bytes()).map_err(|err| storage_err!("get record", err))?;
        Ok(bytes.and_then(|bytes| serde_json::from_slice(&bytes).ok()))
    }

    fn join_signatures(&self, record: &mut Record) -> Result<bool> {
        match self.get_signatures(&record.hash)? {
            Some(signatures) => {
                record.signatures = signatures;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reverse iterator positioned at the newest time-index entry of a
    /// schema. Seeding with the next id's 4-byte prefix lands on the last
    /// key of this schema's range because the bare prefix sorts before any
    /// key extending it.
    fn time_index_newest_first(&self, cf: &ColumnFamily, ds_id: DataStructureId) -> DBIteratorWithThreadMode<'_, DB> {
        match ds_id.checked_add(1) {
            Some(next) => self.db.iterator_cf(cf, IteratorMode::From(&next.to_be_bytes(), Direction::Reverse)),
            None => self.db.iterator_cf(cf, IteratorMode::End),
        }
    }
}

fn timestamp_segment(timestamp: i64) -> [u8; 8] {
    u64::try_from(timestamp).unwrap_or(0).to_be_bytes()
}

fn time_index_key(ds_id: DataStructureId, timestamp: i64, hash: &RequestHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(TIME_INDEX_KEY_LEN);
    key.extend_from_slice(&ds_id.to_be_bytes());
    key.extend_from_slice(&timestamp_segment(timestamp));
    key.extend_from_slice(hash.as_bytes());
    key
}

fn field_prefix(ds_id: DataStructureId, field: &str, value: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + field.len() + value.len() + 2);
    key.extend_from_slice(&ds_id.to_be_bytes());
    key.extend_from_slice(field.as_bytes());
    key.push(b':');
    key.extend_from_slice(value.as_bytes());
    key.push(b':');
    key
}

fn field_index_key(ds_id: DataStructureId, field: &str, value: &str, hash: &RequestHash) -> Vec<u8> {
    let mut key = field_prefix(ds_id, field, value);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Index rendering of a field value: strings raw, everything else in its
/// JSON form.
fn value_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn hash_from_key_tail(key: &[u8]) -> Option<RequestHash> {
    if key.len() < HASH_LEN {
        return None;
    }
    let mut bytes = [0u8; HASH_LEN];
    bytes.copy_from_slice(&key[key.len() - HASH_LEN..]);
    Some(RequestHash::new(bytes))
}

fn timestamp_from_time_key(key: &[u8]) -> Option<i64> {
    if key.len() != TIME_INDEX_KEY_LEN {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[4..12]);
    Some(u64::from_be_bytes(bytes) as i64)
}

fn normalize_limit(limit: usize) -> usize {
    if (1..=100).contains(&limit) {
        limit
    } else {
        10
    }
}

impl Store for RocksStore {
    fn store_data(&self, request: &SignRequest) -> Result<()> {
        let _guard = self.write_guard()?;
        debug!("store_data hash={} ds_id={} ts={}", request.hash, request.data_structure_id, request.timestamp);

        let schema_cf = self.cf(CF_SCHEMA)?;
        let schema_key = request.data_structure_id.to_be_bytes();
        if self.db.get_cf(schema_cf, schema_key).map_err(|err| storage_err!("get schema", err))?.is_none() {
            let encoded = serde_json::to_vec(&request.data_structure)?;
            self.db.put_cf(schema_cf, schema_key, encoded).map_err(|err| storage_err!("put schema", err))?;
        }

        let record = Record::from_request(request);
        let encoded = serde_json::to_vec(&record)?;
        self.db
            .put_cf(self.cf(CF_RECORD)?, request.hash.as_bytes(), encoded)
            .map_err(|err| storage_err!("put record", err))?;

        self.db
            .put_cf(self.cf(CF_TIME_INDEX)?, time_index_key(request.data_structure_id, request.timestamp, &request.hash), [])
            .map_err(|err| storage_err!("put time index", err))?;

        let field_cf = self.cf(CF_FIELD_INDEX)?;
        for (field, value) in request.field_pairs() {
            let key = field_index_key(request.data_structure_id, field, &value_segment(value), &request.hash);
            self.db.put_cf(field_cf, key, []).map_err(|err| storage_err!("put field index", err))?;
        }

        Ok(())
    }

    fn store_signature(&self, hash: &RequestHash, signer: &Address, signature: &str) -> Result<()> {
        let _guard = self.write_guard()?;
        trace!("store_signature hash={} signer={signer}", hash);

        let cf = self.cf(CF_SIGNATURE)?;
        let mut signatures: BTreeMap<String, String> =
            match self.db.get_cf(cf, hash.as_bytes()).map_err(|err| storage_err!("get signatures", err))? {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => BTreeMap::new(),
            };
        signatures.insert(signer.to_string(), signature.to_string());

        let encoded = serde_json::to_vec(&signatures)?;
        self.db.put_cf(cf, hash.as_bytes(), encoded).map_err(|err| storage_err!("put signatures", err))
    }

    fn get_data(&self, hash: &RequestHash) -> Result<Option<Record>> {
        let Some(mut record) = self.record_at(hash)? else {
            return Ok(None);
        };
        self.join_signatures(&mut record)?;
        Ok(Some(record))
    }

    fn get_signatures(&self, hash: &RequestHash) -> Result<Option<BTreeMap<String, String>>> {
        let bytes = self.db.get_cf(self.cf(CF_SIGNATURE)?, hash.as_bytes()).map_err(|err| storage_err!("get signatures", err))?;
        Ok(bytes.and_then(|bytes| serde_json::from_slice(&bytes).ok()))
    }

    fn get_all_messages(&self, ds_id: DataStructureId, page: usize, limit: usize) -> Result<Vec<Record>> {
        let page = page.max(1);
        let limit = normalize_limit(limit);
        let mut skip = (page - 1) * limit;

        let cf = self.cf(CF_TIME_INDEX)?;
        let prefix = ds_id.to_be_bytes();
        let mut out = Vec::new();
        for item in self.time_index_newest_first(cf, ds_id) {
            let (key, _) = item.map_err(|err| storage_err!("iterate time index", err))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(hash) = (key.len() == TIME_INDEX_KEY_LEN).then(|| hash_from_key_tail(&key)).flatten() else {
                continue;
            };
            let Some(mut record) = self.record_at(&hash)? else {
                continue;
            };
            if skip > 0 {
                skip -= 1;
                continue;
            }
            self.join_signatures(&mut record)?;
            out.push(record);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn get_latest_message(&self, ds_id: DataStructureId) -> Result<Option<Record>> {
        let cf = self.cf(CF_TIME_INDEX)?;
        let prefix = ds_id.to_be_bytes();
        for item in self.time_index_newest_first(cf, ds_id) {
            let (key, _) = item.map_err(|err| storage_err!("iterate time index", err))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(hash) = hash_from_key_tail(&key) else {
                continue;
            };
            let Some(mut record) = self.record_at(&hash)? else {
                continue;
            };
            return Ok(self.join_signatures(&mut record)?.then_some(record));
        }
        Ok(None)
    }

    fn get_messages_by_field(
        &self,
        ds_id: DataStructureId,
        field: &str,
        value: &str,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let limit = normalize_limit(limit);
        let prefix = field_prefix(ds_id, field, value);
        let mut skipped = 0usize;
        let mut out = Vec::new();

        let cf = self.cf(CF_FIELD_INDEX)?;
        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item.map_err(|err| storage_err!("iterate field index", err))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(hash) = hash_from_key_tail(&key) else {
                continue;
            };
            let Some(mut record) = self.record_at(&hash)? else {
                continue;
            };
            if skipped < page * limit {
                skipped += 1;
                continue;
            }
            self.join_signatures(&mut record)?;
            out.push(record);
            if out.len() >= limit {
                break;
            }
        }

        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    fn get_latest_by_field(
        &self,
        ds_id: DataStructureId,
        threshold: usize,
        field: &str,
        value: &str,
    ) -> Result<Option<Record>> {
        let prefix = field_prefix(ds_id, field, value);
        let mut latest: Option<Record> = None;

        let cf = self.cf(CF_FIELD_INDEX)?;
        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item.map_err(|err| storage_err!("iterate field index", err))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(hash) = hash_from_key_tail(&key) else {
                continue;
            };
            let Some(mut record) = self.record_at(&hash)? else {
                continue;
            };
            let Some(signatures) = self.get_signatures(&hash)? else {
                continue;
            };
            if signatures.len() < threshold {
                continue;
            }
            if latest.as_ref().map_or(true, |best| record.timestamp > best.timestamp) {
                record.signatures = signatures;
                latest = Some(record);
            }
        }
        Ok(latest)
    }

    fn get_latest_confirmed(&self, ds_id: DataStructureId, threshold: usize) -> Result<Option<Record>> {
        let cf = self.cf(CF_TIME_INDEX)?;
        let prefix = ds_id.to_be_bytes();
        for item in self.time_index_newest_first(cf, ds_id) {
            let (key, _) = item.map_err(|err| storage_err!("iterate time index", err))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(hash) = hash_from_key_tail(&key) else {
                continue;
            };
            let Some(mut record) = self.record_at(&hash)? else {
                continue;
            };
            if let Some(signatures) = self.get_signatures(&hash)? {
                if signatures.len() >= threshold {
                    record.signatures = signatures;
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    fn get_data_structures(&self) -> Result<Vec<DataStructureId>> {
        let cf = self.cf(CF_SCHEMA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|err| storage_err!("iterate schemas", err))?;
            if let Ok(bytes) = <[u8; 4]>::try_from(key.as_ref()) {
                ids.push(DataStructureId::from_be_bytes(bytes));
            }
        }
        Ok(ids)
    }

    fn get_structure_stats(&self, ds_id: DataStructureId, threshold: usize) -> Result<StructureStats> {
        let mut stats = StructureStats { id: ds_id, ..StructureStats::default() };
        let cf = self.cf(CF_TIME_INDEX)?;
        let prefix = ds_id.to_be_bytes();
        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item.map_err(|err| storage_err!("iterate time index", err))?;
            if !key.starts_with(&prefix) {
                break;
            }
            stats.message_count += 1;
            let (Some(timestamp), Some(hash)) = (timestamp_from_time_key(&key), hash_from_key_tail(&key)) else {
                continue;
            };
            stats.last_message_time = stats.last_message_time.max(timestamp);
            if let Some(signatures) = self.get_signatures(&hash)? {
                if signatures.len() >= threshold && timestamp > stats.last_confirmed_time {
                    stats.last_confirmed_time = timestamp;
                    stats.last_confirmed_hash = hash.to_string();
                }
            }
        }
        Ok(stats)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|err| storage_err!("flush", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, RocksStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = RocksStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    fn quote_request(seed: u8, ds_id: DataStructureId, timestamp: i64, ticker: &str) -> SignRequest {
        SignRequest {
            hash: RequestHash::new([seed; 32]),
            data: vec![Value::from(ticker), Value::from("1000000000000000000")],
            data_structure: vec!["string".into(), "string".into()],
            data_structure_meta: vec!["ticker".into(), "price".into()],
            data_structure_id: ds_id,
            timestamp,
        }
    }

    fn signer(seed: u8) -> Address {
        Address::from_slice(&[seed; 20])
    }

    #[test]
    fn record_round_trip_joins_signatures() {
        let (_dir, store) = open_store();
        let request = quote_request(1, 1, 100, "SBER");
        store.store_data(&request).unwrap();

        let record = store.get_data(&request.hash).unwrap().unwrap();
        assert_eq!(record.timestamp, 100);
        assert!(record.signatures.is_empty());
        assert!(store.get_signatures(&request.hash).unwrap().is_none());

        store.store_signature(&request.hash, &signer(1), "0xaa").unwrap();
        store.store_signature(&request.hash, &signer(2), "0xbb").unwrap();
        let record = store.get_data(&request.hash).unwrap().unwrap();
        assert_eq!(record.signatures.len(), 2);

        // Re-signing replaces, never appends.
        store.store_signature(&request.hash, &signer(1), "0xcc").unwrap();
        let signatures = store.get_signatures(&request.hash).unwrap().unwrap();
        assert_eq!(signatures.len(), 2);
        assert_eq!(signatures[&signer(1).to_string()], "0xcc");
    }

    #[test]
    fn missing_hash_reads_as_absent() {
        let (_dir, store) = open_store();
        assert!(store.get_data(&RequestHash::new([9; 32])).unwrap().is_none());
    }

    #[test]
    fn all_messages_are_paged_newest_first() {
        let (_dir, store) = open_store();
        for (seed, ts) in [(1u8, 100i64), (2, 101), (3, 102), (4, 103), (5, 104)] {
            store.store_data(&quote_request(seed, 7, ts, "SBER")).unwrap();
        }

        let timestamps =
            |records: Vec<Record>| records.into_iter().map(|record| record.timestamp).collect::<Vec<_>>();

        assert_eq!(timestamps(store.get_all_messages(7, 1, 2).unwrap()), vec![104, 103]);
        assert_eq!(timestamps(store.get_all_messages(7, 2, 2).unwrap()), vec![102, 101]);
        assert_eq!(timestamps(store.get_all_messages(7, 3, 2).unwrap()), vec![100]);
        // Out-of-range paging parameters fall back to page 1 / limit 10.
        assert_eq!(store.get_all_messages(7, 0, 0).unwrap().len(), 5);
        assert_eq!(store.get_all_messages(7, 1, 101).unwrap().len(), 5);
        // A neighboring schema never bleeds in.
        store.store_data(&quote_request(6, 8, 999, "SBER")).unwrap();
        assert_eq!(timestamps(store.get_all_messages(7, 1, 10).unwrap()), vec![104, 103, 102, 101, 100]);
    }

    #[test]
    fn by_field_queries_filter_and_sort() {
        let (_dir, store) = open_store();
        store.store_data(&quote_request(1, 7, 1, "SBER")).unwrap();
        store.store_data(&quote_request(2, 7, 2, "SBER")).unwrap();
        store.store_data(&quote_request(3, 7, 3, "SBER")).unwrap();
        store.store_data(&quote_request(4, 7, 4, "GAZP")).unwrap();

        let sber = store.get_messages_by_field(7, "ticker", "SBER", 0, 10).unwrap();
        assert_eq!(sber.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![3, 2, 1]);

        let gazp = store.get_messages_by_field(7, "ticker", "GAZP", 0, 10).unwrap();
        assert_eq!(gazp.len(), 1);
        assert_eq!(gazp[0].timestamp, 4);

        // By-field pagination skips page*limit entries in key order.
        let paged = store.get_messages_by_field(7, "ticker", "SBER", 1, 2).unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].timestamp, 3);

        assert!(store.get_messages_by_field(7, "ticker", "AAPL", 0, 10).unwrap().is_empty());
    }

    #[test]
    fn latest_by_field_respects_the_threshold() {
        let (_dir, store) = open_store();
        let older = quote_request(1, 7, 10, "SBER");
        let newer = quote_request(2, 7, 20, "SBER");
        store.store_data(&older).unwrap();
        store.store_data(&newer).unwrap();

        store.store_signature(&older.hash, &signer(1), "0xaa").unwrap();
        store.store_signature(&older.hash, &signer(2), "0xbb").unwrap();
        store.store_signature(&newer.hash, &signer(1), "0xcc").unwrap();

        let confirmed = store.get_latest_by_field(7, 2, "ticker", "SBER").unwrap().unwrap();
        assert_eq!(confirmed.timestamp, 10);
        assert_eq!(confirmed.signatures.len(), 2);

        let loose = store.get_latest_by_field(7, 1, "ticker", "SBER").unwrap().unwrap();
        assert_eq!(loose.timestamp, 20);

        assert!(store.get_latest_by_field(7, 3, "ticker", "SBER").unwrap().is_none());
    }

    #[test]
    fn latest_message_requires_a_signature_map() {
        let (_dir, store) = open_store();
        let request = quote_request(1, 7, 10, "SBER");
        store.store_data(&request).unwrap();
        assert!(store.get_latest_message(7).unwrap().is_none());

        store.store_signature(&request.hash, &signer(1), "0xaa").unwrap();
        let latest = store.get_latest_message(7).unwrap().unwrap();
        assert_eq!(latest.hash, request.hash);
        assert_eq!(latest.signatures.len(), 1);
    }

    #[test]
    fn latest_confirmed_walks_past_unconfirmed_heads() {
        let (_dir, store) = open_store();
        let confirmed = quote_request(1, 7, 10, "SBER");
        let unconfirmed = quote_request(2, 7, 20, "SBER");
        store.store_data(&confirmed).unwrap();
        store.store_data(&unconfirmed).unwrap();
        store.store_signature(&confirmed.hash, &signer(1), "0xaa").unwrap();
        store.store_signature(&confirmed.hash, &signer(2), "0xbb").unwrap();

        let latest = store.get_latest_confirmed(7, 2).unwrap().unwrap();
        assert_eq!(latest.hash, confirmed.hash);

        assert!(store.get_latest_confirmed(7, 3).unwrap().is_none());
    }

    #[test]
    fn schema_ids_are_written_once_and_listed() {
        let (_dir, store) = open_store();
        store.store_data(&quote_request(1, 7, 1, "SBER")).unwrap();
        store.store_data(&quote_request(2, 7, 2, "SBER")).unwrap();
        store.store_data(&quote_request(3, 3, 3, "SBER")).unwrap();

        assert_eq!(store.get_data_structures().unwrap(), vec![3, 7]);
    }

    #[test]
    fn structure_stats_track_counts_and_confirmation() {
        let (_dir, store) = open_store();
        let first = quote_request(1, 7, 10, "SBER");
        let second = quote_request(2, 7, 20, "SBER");
        let third = quote_request(3, 7, 30, "SBER");
        store.store_data(&first).unwrap();
        store.store_data(&second).unwrap();
        store.store_data(&third).unwrap();
        store.store_signature(&second.hash, &signer(1), "0xaa").unwrap();

        let stats = store.get_structure_stats(7, 1).unwrap();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.last_message_time, 30);
        assert_eq!(stats.last_confirmed_time, 20);
        assert_eq!(stats.last_confirmed_hash, second.hash.to_string());

        let strict = store.get_structure_stats(7, 2).unwrap();
        assert_eq!(strict.last_confirmed_time, 0);
        assert!(strict.last_confirmed_hash.is_empty());
    }
}
