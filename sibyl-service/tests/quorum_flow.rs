//! End-to-end quorum collection over the in-process gossip hub.

use alloy_primitives::Address;
use sibyl_core::domain::hashes::{calculate_hash, text_hash};
use sibyl_core::domain::message::{SignRequest, SignResponse, WireMessage};
use sibyl_core::domain::signing::{EthSigner, TrustedSet};
use sibyl_core::foundation::error::{OracleError, Result};
use sibyl_core::infrastructure::storage::{RocksStore, Store};
use sibyl_core::infrastructure::transport::mock::{MockHub, MockTransport};
use sibyl_core::infrastructure::transport::{Transport, TransportSubscription};
use sibyl_service::service::{Coordinator, RequestPublisher, SignerNode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const TOPIC: &str = "quotes";

fn quote_request(timestamp: i64) -> SignRequest {
    let data = vec![serde_json::Value::from("SBER"), serde_json::Value::from("300000000000000000000")];
    let hash = calculate_hash(&data, timestamp).expect("hash");
    SignRequest {
        hash,
        data,
        data_structure: vec!["string".into(), "string".into()],
        data_structure_meta: vec!["ticker".into(), "price".into()],
        data_structure_id: 1,
        timestamp,
    }
}

fn signed_response(signer: &EthSigner, request: &SignRequest) -> Vec<u8> {
    let signature = signer.sign_digest(&text_hash(request.hash.as_bytes()));
    WireMessage::SignResponse(SignResponse {
        hash: request.hash,
        signature,
        peer_id: signer.address().to_string(),
    })
    .encode()
    .expect("encode response")
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

struct Cluster {
    _dir: TempDir,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    coordinator: Arc<Coordinator>,
    shutdown: broadcast::Sender<()>,
    trusted_addresses: Vec<Address>,
}

impl Cluster {
    /// A coordinator plus `responding` live signer nodes out of
    /// `trusted_count` trusted keys, all on one mock hub.
    async fn start(trusted_count: usize, responding: usize, pending_expiry: Option<Duration>) -> Self {
        let hub = MockHub::new();
        let dir = TempDir::new().expect("temp dir");
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).expect("open store"));

        let signers: Vec<EthSigner> = (0..trusted_count).map(|_| EthSigner::random()).collect();
        let trusted_addresses: Vec<Address> = signers.iter().map(EthSigner::address).collect();
        let trusted = TrustedSet::new(trusted_addresses.clone()).expect("trusted set");

        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new(hub.clone(), TOPIC));
        let coordinator = match pending_expiry {
            Some(expiry) => Coordinator::with_pending_expiry(transport.clone(), store.clone(), trusted, expiry),
            None => Coordinator::new(transport.clone(), store.clone(), trusted),
        };
        let (shutdown, _) = broadcast::channel(4);
        coordinator.start(&shutdown);

        for signer in signers.into_iter().take(responding) {
            let node_transport: Arc<dyn Transport> = Arc::new(MockTransport::new(hub.clone(), TOPIC));
            SignerNode::new(node_transport, signer).start(&shutdown);
        }

        // Let every listen loop acquire its subscription before publishing.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self { _dir: dir, store, transport, coordinator, shutdown, trusted_addresses }
    }

    fn publisher(&self) -> RequestPublisher {
        RequestPublisher::new(self.transport.clone(), self.store.clone(), self.coordinator.clone())
    }

    fn signature_count(&self, request: &SignRequest) -> usize {
        self.store.get_signatures(&request.hash).expect("get signatures").map_or(0, |map| map.len())
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

#[tokio::test]
async fn full_trusted_set_reaches_quorum_and_retires_the_request() {
    let cluster = Cluster::start(3, 3, None).await;
    let request = quote_request(1_700_000_100);

    cluster.publisher().publish_sign_request(&request).await.expect("publish");

    wait_until("three stored signatures", || cluster.signature_count(&request) == 3).await;
    wait_until("pending entry retired", || !cluster.coordinator.pending_contains(&request.hash)).await;

    let confirmed = cluster.store.get_latest_by_field(1, 2, "ticker", "SBER").expect("query").expect("confirmed record");
    assert_eq!(confirmed.hash, request.hash);
    assert_eq!(confirmed.signatures.len(), 3);
    for address in &cluster.trusted_addresses {
        assert!(confirmed.signatures.contains_key(&address.to_string()));
    }
}

#[tokio::test]
async fn partial_quorum_survives_expiry() {
    let cluster = Cluster::start(3, 2, Some(Duration::from_millis(200))).await;
    let request = quote_request(1_700_000_200);

    cluster.publisher().publish_sign_request(&request).await.expect("publish");

    wait_until("two stored signatures", || cluster.signature_count(&request) == 2).await;
    // Quorum (2 of 3) is met but the set is not maximal, so the entry stays.
    assert!(cluster.coordinator.pending_contains(&request.hash));

    tokio::time::sleep(Duration::from_millis(250)).await;
    let expired = cluster.coordinator.sweep_expired();
    assert!(expired.contains(&request.hash));
    assert!(!cluster.coordinator.pending_contains(&request.hash));

    // Persisted signatures outlive the pending entry; confirmed queries work.
    assert_eq!(cluster.signature_count(&request), 2);
    let confirmed = cluster.store.get_latest_confirmed(1, 2).expect("query").expect("confirmed record");
    assert_eq!(confirmed.hash, request.hash);
}

#[tokio::test]
async fn untrusted_responders_change_nothing() {
    let cluster = Cluster::start(2, 0, None).await;
    let request = quote_request(1_700_000_300);

    cluster.store.store_data(&request).expect("store data");
    cluster.coordinator.admit_request(&request);

    let outsider = EthSigner::random();
    cluster.coordinator.handle_message(&signed_response(&outsider, &request));

    assert!(cluster.store.get_signatures(&request.hash).expect("get signatures").is_none());
    assert_eq!(cluster.coordinator.pending_signer_count(&request.hash), Some(0));
}

#[tokio::test]
async fn duplicate_responses_are_idempotent() {
    let hub = MockHub::new();
    let dir = TempDir::new().expect("temp dir");
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).expect("open store"));

    let signer = EthSigner::random();
    let bystander = EthSigner::random();
    let trusted = TrustedSet::new(vec![signer.address(), bystander.address()]).expect("trusted set");
    let transport: Arc<dyn Transport> = Arc::new(MockTransport::new(hub, TOPIC));
    let coordinator = Coordinator::new(transport, store.clone(), trusted);

    let request = quote_request(1_700_000_400);
    store.store_data(&request).expect("store data");
    coordinator.admit_request(&request);

    let response = signed_response(&signer, &request);
    coordinator.handle_message(&response);
    coordinator.handle_message(&response);

    assert_eq!(coordinator.pending_signer_count(&request.hash), Some(1));
    let signatures = store.get_signatures(&request.hash).expect("get signatures").expect("signature map");
    assert_eq!(signatures.len(), 1);
}

/// First subscription dies on its first read; everything after that
/// delegates to the hub.
struct FlakyTransport {
    inner: MockTransport,
    tripped: AtomicBool,
}

#[async_trait::async_trait]
impl Transport for FlakyTransport {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.inner.publish(payload).await
    }

    async fn subscribe(&self) -> Result<TransportSubscription> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            let stream = async_stream::stream! {
                yield Err(OracleError::Transport {
                    operation: "subscription".to_string(),
                    details: "injected read failure".to_string(),
                });
            };
            return Ok(TransportSubscription::new(Box::pin(stream)));
        }
        self.inner.subscribe().await
    }

    async fn peer_count(&self) -> usize {
        self.inner.peer_count().await
    }

    async fn reconnect_known_peers(&self) -> usize {
        self.inner.reconnect_known_peers().await
    }

    async fn evict_stale_peers(&self) {
        self.inner.evict_stale_peers().await
    }
}

#[tokio::test]
async fn coordinator_recovers_from_a_failed_subscription() {
    let hub = MockHub::new();
    let dir = TempDir::new().expect("temp dir");
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).expect("open store"));

    let signer = EthSigner::random();
    let trusted = TrustedSet::new(vec![signer.address()]).expect("trusted set");
    let transport: Arc<dyn Transport> = Arc::new(FlakyTransport {
        inner: MockTransport::new(hub.clone(), TOPIC),
        tripped: AtomicBool::new(false),
    });
    let coordinator = Coordinator::new(transport.clone(), store.clone(), trusted);
    let (shutdown, _) = broadcast::channel(4);
    coordinator.start(&shutdown);

    let signer_transport: Arc<dyn Transport> = Arc::new(MockTransport::new(hub, TOPIC));
    SignerNode::new(signer_transport, signer).start(&shutdown);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let publisher = RequestPublisher::new(transport, store.clone(), coordinator.clone());
    let request = quote_request(1_700_000_500);
    publisher.publish_sign_request(&request).await.expect("publish");

    wait_until("signature processed after resubscribe", || {
        store.get_signatures(&request.hash).expect("get signatures").map_or(0, |map| map.len()) == 1
    })
    .await;

    let _ = shutdown.send(());
}
