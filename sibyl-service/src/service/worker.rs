//! The request path from observation to broadcast: persist first, admit to
//! the pending table, then publish with bounded retries.

use super::Coordinator;
use log::{info, warn};
use sibyl_core::aggregator::PriceAggregator;
use sibyl_core::domain::message::{SignRequest, WireMessage};
use sibyl_core::domain::schema::QuoteMessageBuilder;
use sibyl_core::foundation::constants::{PUBLISH_RETRIES, PUBLISH_RETRY_DELAY, PUBLISH_TIMEOUT};
use sibyl_core::foundation::error::{OracleError, Result};
use sibyl_core::infrastructure::storage::Store;
use sibyl_core::infrastructure::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

pub struct RequestPublisher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    coordinator: Arc<Coordinator>,
}

impl RequestPublisher {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn Store>, coordinator: Arc<Coordinator>) -> Self {
        Self { transport, store, coordinator }
    }

    /// The record is durable before the first broadcast, so a response can
    /// never arrive for a hash the store has not seen.
    pub async fn publish_sign_request(&self, request: &SignRequest) -> Result<()> {
        self.store.store_data(request)?;
        self.coordinator.admit_request(request);

        let payload = WireMessage::SignRequest(request.clone()).encode()?;
        let mut last_error =
            OracleError::Transport { operation: "publish".to_string(), details: "no attempts made".to_string() };
        for attempt in 1..=PUBLISH_RETRIES {
            match tokio::time::timeout(PUBLISH_TIMEOUT, self.transport.publish(payload.clone())).await {
                Ok(Ok(())) => {
                    info!("published sign request hash={}", request.hash);
                    return Ok(());
                }
                Ok(Err(err)) => last_error = err,
                Err(_) => {
                    last_error = OracleError::Transport {
                        operation: "publish".to_string(),
                        details: format!("timed out after {}s", PUBLISH_TIMEOUT.as_secs()),
                    }
                }
            }
            warn!("publish attempt {attempt}/{PUBLISH_RETRIES} failed hash={} error={last_error}", request.hash);
            if attempt < PUBLISH_RETRIES {
                tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
            }
        }
        Err(last_error)
    }
}

/// One per configured ticker: aggregate a price, build the observation,
/// hand it to the publisher. Failed ticks are skipped; nothing is emitted
/// with stale or missing data.
pub struct CollectionWorker {
    ticker: String,
    aggregator: PriceAggregator,
    builder: QuoteMessageBuilder,
    publisher: Arc<RequestPublisher>,
    interval: Duration,
}

impl CollectionWorker {
    pub fn new(
        ticker: impl Into<String>,
        aggregator: PriceAggregator,
        builder: QuoteMessageBuilder,
        publisher: Arc<RequestPublisher>,
        interval: Duration,
    ) -> Self {
        Self { ticker: ticker.into(), aggregator, builder, publisher, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("data collection worker started ticker={} interval_secs={}", self.ticker, self.interval.as_secs());
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticks.tick() => {
                    let price = match self.aggregator.average_price().await {
                        Ok(price) => price,
                        Err(err) => {
                            warn!("error getting average price ticker={} error={err}", self.ticker);
                            continue;
                        }
                    };
                    let request = match self.builder.build_message(price) {
                        Ok(request) => request,
                        Err(err) => {
                            warn!("error building sign request ticker={} error={err}", self.ticker);
                            continue;
                        }
                    };
                    if let Err(err) = self.publisher.publish_sign_request(&request).await {
                        warn!("error publishing sign request ticker={} error={err}", self.ticker);
                    }
                }
            }
        }
    }
}
