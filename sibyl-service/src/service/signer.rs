//! The signer role: validate inbound requests, sign the domain-separated
//! digest, publish the response.

use alloy_primitives::Address;
use log::{info, trace, warn};
use sibyl_core::domain::hashes::text_hash;
use sibyl_core::domain::message::{SignRequest, SignResponse, WireMessage};
use sibyl_core::domain::signing::EthSigner;
use sibyl_core::foundation::constants::{
    CONNECTION_CHECK_INTERVAL, RECONNECT_TIMEOUT, SIGNER_MAX_RECONNECT_ATTEMPTS, SIGNER_READ_TIMEOUT,
};
use sibyl_core::infrastructure::transport::{Transport, TransportSubscription};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct SignerNode {
    transport: Arc<dyn Transport>,
    signer: EthSigner,
}

impl SignerNode {
    pub fn new(transport: Arc<dyn Transport>, signer: EthSigner) -> Arc<Self> {
        Arc::new(Self { transport, signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().listen_loop(shutdown.subscribe())),
            tokio::spawn(self.clone().connection_monitor(shutdown.subscribe())),
        ]
    }

    async fn listen_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut subscription: Option<TransportSubscription> = None;
        loop {
            let Some(active) = subscription.as_mut() else {
                subscription =
                    super::resubscribe(&self.transport, &mut shutdown, SIGNER_MAX_RECONNECT_ATTEMPTS, false).await;
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
                read = tokio::time::timeout(SIGNER_READ_TIMEOUT, active.next()) => match read {
                    Ok(Some(Ok(payload))) => self.handle_message(&payload).await,
                    Ok(Some(Err(err))) => {
                        warn!("error reading from subscription error={err}");
                        reset = true;
                    }
                    Ok(None) => {
                        warn!("subscription stream ended, resubscribing");
                        reset = true;
                    }
                    Err(_) => {
                        warn!("subscription read exceeded {}s, resubscribing", SIGNER_READ_TIMEOUT.as_secs());
                        reset = true;
                    }
                },
            }
            if reset {
                subscription = None;
            }
        }
    }

    pub async fn handle_message(&self, payload: &[u8]) {
        match WireMessage::decode(payload) {
            Err(err) => warn!("error decoding gossip message error={err}"),
            // A signer never consumes responses, its own included.
            Ok(WireMessage::SignResponse(_)) => trace!("ignoring sign response"),
            Ok(WireMessage::SignRequest(request)) => self.handle_sign_request(request).await,
        }
    }

    async fn handle_sign_request(&self, request: SignRequest) {
        info!("processing sign request hash={}", request.hash);

        let digest = text_hash(request.hash.as_bytes());
        let signature = self.signer.sign_digest(&digest);
        let response = WireMessage::SignResponse(SignResponse {
            hash: request.hash,
            signature,
            peer_id: self.signer.address().to_string(),
        });

        let payload = match response.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!("error encoding sign response hash={} error={err}", request.hash);
                return;
            }
        };
        // Dropped responses are recovered by the coordinator's rebroadcast.
        if let Err(err) = self.transport.publish(payload).await {
            warn!("error publishing sign response hash={} error={err}", request.hash);
        }
    }

    /// Re-dials the bootstrap peer whenever the node finds itself alone.
    async fn connection_monitor(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticks =
            tokio::time::interval_at(tokio::time::Instant::now() + CONNECTION_CHECK_INTERVAL, CONNECTION_CHECK_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticks.tick() => {
                    if self.transport.peer_count().await == 0 {
                        warn!("no peers connected, attempting to reconnect to bootstrap");
                        self.transport.reconnect_known_peers().await;
                    }
                }
            }
        }
    }
}
