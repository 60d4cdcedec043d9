//! The coordinator role: listens on the topic, verifies and accounts
//! signatures against the trusted set, rebroadcasts in-flight requests, and
//! supervises its own subscription and peer set.

use log::{debug, info, trace, warn};
use sibyl_core::domain::hashes::text_hash;
use sibyl_core::domain::message::{SignRequest, SignResponse, WireMessage};
use sibyl_core::domain::pending::{PendingTable, SignatureOutcome};
use sibyl_core::domain::signing::{recover_signer, TrustedSet};
use sibyl_core::foundation::constants::{
    EXPIRY_SWEEP_INTERVAL, HEALTH_CHECK_INTERVAL, MAX_CONSECUTIVE_TIMEOUTS, MAX_RECONNECT_ATTEMPTS,
    MESSAGE_SILENCE_LIMIT, PEER_DISCOVERY_INTERVAL, PEER_EVICTION_WINDOW, PENDING_EXPIRY, PUBLISH_TIMEOUT,
    REBROADCAST_INTERVAL, RECONNECT_TIMEOUT, SUBSCRIPTION_READ_TIMEOUT,
};
use sibyl_core::foundation::error::{OracleError, Result};
use sibyl_core::foundation::RequestHash;
use sibyl_core::infrastructure::storage::Store;
use sibyl_core::infrastructure::transport::{Transport, TransportSubscription};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Coordinator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    pending: PendingTable,
    trusted: TrustedSet,
    last_message: Mutex<Option<Instant>>,
    subscription_reset: Notify,
}

impl Coordinator {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn Store>, trusted: TrustedSet) -> Arc<Self> {
        Self::with_pending_expiry(transport, store, trusted, PENDING_EXPIRY)
    }

    pub fn with_pending_expiry(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        trusted: TrustedSet,
        pending_expiry: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            store,
            pending: PendingTable::new(pending_expiry),
            trusted,
            last_message: Mutex::new(None),
            subscription_reset: Notify::new(),
        })
    }

    pub fn threshold(&self) -> usize {
        self.trusted.threshold()
    }

    /// Idempotent pending admission; also the entry point for locally
    /// authored requests, since gossip does not loop publishes back.
    pub fn admit_request(&self, request: &SignRequest) -> bool {
        self.pending.admit(request)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_contains(&self, hash: &RequestHash) -> bool {
        self.pending.contains(hash)
    }

    pub fn pending_signer_count(&self, hash: &RequestHash) -> Option<usize> {
        self.pending.signer_count(hash)
    }

    /// Drops pending entries past their expiry; stored signatures stay.
    pub fn sweep_expired(&self) -> Vec<RequestHash> {
        self.pending.sweep_expired()
    }

    /// Spawns every background loop; all of them exit on the shutdown
    /// broadcast.
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().listen_loop(shutdown.subscribe())),
            tokio::spawn(self.clone().rebroadcast_loop(shutdown.subscribe())),
            tokio::spawn(self.clone().peer_supervisor_loop(shutdown.subscribe())),
            tokio::spawn(self.clone().health_loop(shutdown.subscribe())),
        ]
    }

    /// (Re)publishes a request as its bare hash-only form; signers only need
    /// the hash.
    pub async fn broadcast_sign_request(&self, hash: RequestHash) -> Result<()> {
        let payload = WireMessage::SignRequest(SignRequest::rebroadcast(hash)).encode()?;
        match tokio::time::timeout(PUBLISH_TIMEOUT, self.transport.publish(payload)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Transport {
                operation: "publish".to_string(),
                details: format!("timed out after {}s", PUBLISH_TIMEOUT.as_secs()),
            }),
        }
    }

    /// Sole owner of the subscription. Read deadlines, stream errors and
    /// reset hints from the health monitor all funnel into the same bounded
    /// resubscribe path; total resubscription failure backs off and retries
    /// rather than killing the process.
    async fn listen_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut subscription: Option<TransportSubscription> = None;
        loop {
            let Some(active) = subscription.as_mut() else {
                subscription = super::resubscribe(&self.transport, &mut shutdown, MAX_RECONNECT_ATTEMPTS, true).await;
                if subscription.is_none() {
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(RECONNECT_TIMEOUT) => {}
                    }
                }
                continue;
            };
            let mut reset = false;
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = self.subscription_reset.notified() => {
                    info!("subscription reset requested");
                    reset = true;
                }
                read = tokio::time::timeout(SUBSCRIPTION_READ_TIMEOUT, active.next()) => match read {
                    Ok(Some(Ok(payload))) => self.handle_message(&payload),
                    Ok(Some(Err(err))) => {
                        warn!("subscription read failed error={err}, resubscribing");
                        reset = true;
                    }
                    Ok(None) => {
                        warn!("subscription stream ended, resubscribing");
                        reset = true;
                    }
                    Err(_) => {
                        warn!("subscription read exceeded {}s, resubscribing", SUBSCRIPTION_READ_TIMEOUT.as_secs());
                        reset = true;
                    }
                },
            }
            if reset {
                subscription = None;
            }
        }
    }

    pub fn handle_message(&self, payload: &[u8]) {
        let message = match WireMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!("error decoding gossip message error={err}");
                return;
            }
        };
        if let Ok(mut last) = self.last_message.lock() {
            *last = Some(Instant::now());
        }
        match message {
            WireMessage::SignRequest(request) => self.handle_sign_request(request),
            WireMessage::SignResponse(response) => self.handle_sign_response(response),
        }
    }

    /// Admission is idempotent, so a coordinator participates in quorum
    /// collection even when another coordinator authored the request.
    fn handle_sign_request(&self, request: SignRequest) {
        if self.pending.admit(&request) {
            debug!("admitted pending request hash={}", request.hash);
        }
    }

    fn handle_sign_response(&self, response: SignResponse) {
        debug!("received signature response hash={} peer={}", response.hash, response.peer_id);

        let digest = text_hash(response.hash.as_bytes());
        let signer = match recover_signer(&digest, &response.signature) {
            Ok(signer) => signer,
            Err(err) => {
                warn!("signature verification failed hash={} error={err}", response.hash);
                return;
            }
        };
        if !self.trusted.contains(&signer) {
            warn!("untrusted signer hash={} signer={signer}", response.hash);
            return;
        }

        let outcome = self.pending.record_signature(&response.hash, signer, self.threshold(), self.trusted.len(), || {
            self.store.store_signature(&response.hash, &signer, &response.signature)
        });
        match outcome {
            // The entry stays pending; the retry ticker gets another shot.
            Err(err) => warn!("error storing signature hash={} error={err}", response.hash),
            Ok(SignatureOutcome::NotPending) => trace!("response for unknown or retired hash={}", response.hash),
            Ok(SignatureOutcome::Accepted { signers, quorum_reached, completed }) => {
                info!("stored signature hash={} signer={signer} total={signers}", response.hash);
                if quorum_reached {
                    info!("reached threshold {}/{} for hash={}", signers, self.trusted.len(), response.hash);
                }
                if completed {
                    debug!("all trusted signers responded, retiring hash={}", response.hash);
                }
            }
        }
    }

    /// Rebroadcasts every pending hash on a short ticker (catching signers
    /// that joined late or missed the gossip) and sweeps expired entries on
    /// a longer one.
    async fn rebroadcast_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut rebroadcast = tokio::time::interval_at(tokio::time::Instant::now() + REBROADCAST_INTERVAL, REBROADCAST_INTERVAL);
        rebroadcast.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + EXPIRY_SWEEP_INTERVAL, EXPIRY_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = rebroadcast.tick() => {
                    for hash in self.pending.snapshot_hashes() {
                        if let Err(err) = self.broadcast_sign_request(hash).await {
                            warn!("rebroadcast failed hash={hash} error={err}");
                        }
                    }
                }
                _ = sweep.tick() => {
                    for hash in self.sweep_expired() {
                        info!("expired pending request hash={hash}");
                    }
                }
            }
        }
    }

    async fn peer_supervisor_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut discovery = tokio::time::interval_at(tokio::time::Instant::now() + PEER_DISCOVERY_INTERVAL, PEER_DISCOVERY_INTERVAL);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut eviction = tokio::time::interval_at(tokio::time::Instant::now() + PEER_EVICTION_WINDOW, PEER_EVICTION_WINDOW);
        eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = discovery.tick() => {
                    let peers = self.transport.peer_count().await;
                    info!("known peers count={peers}");
                    if peers == 0 {
                        warn!("no peers connected, attempting active peer discovery");
                        let dialed = self.transport.reconnect_known_peers().await;
                        if dialed > 0 {
                            info!("issued reconnect dials count={dialed}");
                        }
                    }
                }
                _ = eviction.tick() => self.transport.evict_stale_peers().await,
            }
        }
    }

    /// Watches for topic silence. A silent, peerless coordinator first
    /// forces peer rediscovery; three strikes in a row escalate to a
    /// subscription reset.
    async fn health_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + HEALTH_CHECK_INTERVAL, HEALTH_CHECK_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive = 0u32;
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticks.tick() => {
                    let recent = self
                        .last_message
                        .lock()
                        .ok()
                        .and_then(|last| *last)
                        .map(|at| at.elapsed() <= MESSAGE_SILENCE_LIMIT)
                        .unwrap_or(false);
                    if recent {
                        consecutive = 0;
                        continue;
                    }
                    warn!("no messages received within {}s, health check triggered", MESSAGE_SILENCE_LIMIT.as_secs());
                    if self.transport.peer_count().await == 0 {
                        warn!("no peers connected, forcing peer rediscovery");
                        self.transport.reconnect_known_peers().await;
                        if consecutive >= MAX_CONSECUTIVE_TIMEOUTS {
                            warn!("repeated silent periods, requesting subscription reset");
                            self.subscription_reset.notify_one();
                            consecutive = 0;
                        } else {
                            consecutive += 1;
                        }
                    } else {
                        consecutive = 0;
                    }
                }
            }
        }
    }
}
