//! In-flight request table with quorum accounting.
//!
//! Process-local by design: persisted signatures survive a restart, partial
//! quorums do not. A signer is only counted after its signature is durable,
//! which is why the persist closure runs under the table's write lock.

use crate::domain::message::SignRequest;
use crate::foundation::error::{OracleError, Result};
use crate::foundation::RequestHash;
use alloy_primitives::Address;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct PendingRequest {
    created_at: Instant,
    signers: HashSet<Address>,
    request: SignRequest,
}

/// What happened to an inbound signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureOutcome {
    /// No pending entry for the hash: either never seen here or already
    /// retired. Common during late arrival; dropped silently.
    NotPending,
    Accepted {
        /// Distinct trusted signers counted so far.
        signers: usize,
        /// The quorum threshold has been met.
        quorum_reached: bool,
        /// Every trusted signer has responded; the entry was removed.
        completed: bool,
    },
}

pub struct PendingTable {
    entries: RwLock<HashMap<RequestHash, PendingRequest>>,
    expiry: Duration,
}

impl PendingTable {
    pub fn new(expiry: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), expiry }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<RequestHash, PendingRequest>>> {
        self.entries.read().map_err(|_| OracleError::Message("pending table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<RequestHash, PendingRequest>>> {
        self.entries.write().map_err(|_| OracleError::Message("pending table lock poisoned".to_string()))
    }

    /// Idempotent admission: the first observation of a hash wins, keeping
    /// its creation time and empty signer set. Returns whether a new entry
    /// was created.
    pub fn admit(&self, request: &SignRequest) -> bool {
        let Ok(mut entries) = self.write() else { return false };
        if entries.contains_key(&request.hash) {
            return false;
        }
        entries.insert(
            request.hash,
            PendingRequest { created_at: Instant::now(), signers: HashSet::new(), request: request.clone() },
        );
        true
    }

    /// Applies a verified signature: runs `persist` under the write lock and
    /// counts the signer only if it succeeds, so a signer is never counted
    /// in memory without being durable. Deletes the entry once every
    /// trusted signer has responded.
    pub fn record_signature<F>(
        &self,
        hash: &RequestHash,
        signer: Address,
        threshold: usize,
        total_signers: usize,
        persist: F,
    ) -> Result<SignatureOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut entries = self.write()?;
        let Some(entry) = entries.get_mut(hash) else {
            return Ok(SignatureOutcome::NotPending);
        };
        persist()?;
        entry.signers.insert(signer);
        let signers = entry.signers.len();
        let quorum_reached = signers >= threshold;
        let completed = signers == total_signers;
        if completed {
            entries.remove(hash);
        }
        Ok(SignatureOutcome::Accepted { signers, quorum_reached, completed })
    }

    /// Removes entries older than the configured expiry; their persisted
    /// signatures are untouched.
    pub fn sweep_expired(&self) -> Vec<RequestHash> {
        let Ok(mut entries) = self.write() else { return Vec::new() };
        let now = Instant::now();
        let expired: Vec<RequestHash> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) > self.expiry)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &expired {
            entries.remove(hash);
        }
        expired
    }

    pub fn snapshot_hashes(&self) -> Vec<RequestHash> {
        self.read().map(|entries| entries.keys().copied().collect()).unwrap_or_default()
    }

    pub fn contains(&self, hash: &RequestHash) -> bool {
        self.read().map(|entries| entries.contains_key(hash)).unwrap_or(false)
    }

    pub fn signer_count(&self, hash: &RequestHash) -> Option<usize> {
        self.read().ok().and_then(|entries| entries.get(hash).map(|entry| entry.signers.len()))
    }

    /// The request as first observed for a hash, if still pending.
    pub fn request_data(&self, hash: &RequestHash) -> Option<SignRequest> {
        self.read().ok().and_then(|entries| entries.get(hash).map(|entry| entry.request.clone()))
    }

    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
