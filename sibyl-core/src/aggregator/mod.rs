//! Price collection boundary: the coordinator only ever sees the arithmetic
//! mean of whatever sources answered within the deadline.

use crate::foundation::error::{OracleError, Result};
use async_trait::async_trait;
use log::warn;
use rand::Rng;
use std::time::Duration;

/// An upstream quote producer. Implementations live outside the core; the
/// aggregator only needs a price on demand.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self) -> Result<f64>;

    /// Identifies the source in logs.
    fn name(&self) -> &str;
}

pub struct PriceAggregator {
    sources: Vec<Box<dyn PriceSource>>,
    timeout: Duration,
}

impl PriceAggregator {
    pub fn new(sources: Vec<Box<dyn PriceSource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    /// Fans a fetch out to every source under one shared deadline and
    /// averages the successes. Zero successes (including a blown deadline)
    /// is `NoPriceAvailable`: no observation is worth emitting with made-up
    /// data.
    pub async fn average_price(&self) -> Result<f64> {
        let fetches = self.sources.iter().map(|source| async move { (source.name(), source.fetch_price().await) });

        let results = match tokio::time::timeout(self.timeout, futures_util::future::join_all(fetches)).await {
            Ok(results) => results,
            Err(_) => {
                warn!("price aggregation timed out timeout_secs={}", self.timeout.as_secs());
                return Err(OracleError::NoPriceAvailable);
            }
        };

        let mut total = 0.0;
        let mut count = 0usize;
        for (name, result) in results {
            match result {
                Ok(price) => {
                    total += price;
                    count += 1;
                }
                Err(err) => warn!("price source failed source={name} error={err}"),
            }
        }

        if count == 0 {
            return Err(OracleError::NoPriceAvailable);
        }
        Ok(total / count as f64)
    }
}

/// Deterministic-enough source for tests and local runs: the base price with
/// bounded random variation.
pub struct MockPriceSource {
    base_price: f64,
    variation: f64,
}

impl MockPriceSource {
    pub fn new(base_price: f64, variation: f64) -> Self {
        Self { base_price, variation }
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn fetch_price(&self) -> Result<f64> {
        let jitter = (rand::thread_rng().gen::<f64>() * 2.0 - 1.0) * self.variation;
        Ok(self.base_price * (1.0 + jitter))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
