pub mod mock;

use crate::foundation::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

/// An owned view of the gossip topic. The stream yields raw message payloads
/// or transport errors; exhaustion means the subscription is dead and the
/// owner should re-subscribe.
pub struct TransportSubscription {
    inner: BoxStream<'static, Result<Vec<u8>>>,
}

impl TransportSubscription {
    pub fn new(inner: BoxStream<'static, Result<Vec<u8>>>) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> Option<Result<Vec<u8>>> {
        self.inner.next().await
    }
}

/// The seam between node logic and the gossip layer. `publish` is safe to
/// call concurrently; subscriptions are owned by whoever reads them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self) -> Result<TransportSubscription>;

    /// Currently connected peers.
    async fn peer_count(&self) -> usize;

    /// Dials every known address that is not currently connected, including
    /// the bootstrap address if one is configured. Returns the number of
    /// dials issued.
    async fn reconnect_known_peers(&self) -> usize;

    /// Drops known-peer entries not seen within the eviction window.
    async fn evict_stale_peers(&self);
}
