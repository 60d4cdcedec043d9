//! In-process gossip hub for tests: every payload published to a topic is
//! fanned out to all of the topic's subscribers, the publisher's own
//! subscription included, matching gossip semantics.

use super::{Transport, TransportSubscription};
use crate::foundation::error::{OracleError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub struct MockHub {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { topics: Mutex::new(HashMap::new()) })
    }

    async fn topic(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        let mut topics = self.topics.lock().await;
        topics.entry(name.to_string()).or_insert_with(|| broadcast::channel(256).0).clone()
    }
}

pub struct MockTransport {
    hub: Arc<MockHub>,
    topic: String,
}

impl MockTransport {
    pub fn new(hub: Arc<MockHub>, topic: impl Into<String>) -> Self {
        Self { hub, topic: topic.into() }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        let sender = self.hub.topic(&self.topic).await;
        // No subscribers is how gossip looks before the mesh forms; not an
        // error.
        let _ = sender.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<TransportSubscription> {
        let sender = self.hub.topic(&self.topic).await;
        let mut receiver = sender.subscribe();
        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(payload) => yield Ok(payload),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        yield Err(OracleError::Transport {
                            operation: "subscription".to_string(),
                            details: format!("lagged behind by {missed} messages"),
                        });
                    }
                }
            }
        };
        Ok(TransportSubscription::new(Box::pin(stream)))
    }

    async fn peer_count(&self) -> usize {
        let sender = self.hub.topic(&self.topic).await;
        sender.receiver_count().saturating_sub(1)
    }

    async fn reconnect_known_peers(&self) -> usize {
        0
    }

    async fn evict_stale_peers(&self) {}
}
