pub mod coordinator;
pub mod signer;
pub mod worker;

pub use coordinator::Coordinator;
pub use signer::SignerNode;
pub use worker::{CollectionWorker, RequestPublisher};

use log::{error, info, warn};
use sibyl_core::foundation::constants::{RECONNECT_TIMEOUT, RESUBSCRIBE_BACKOFF_CAP};
use sibyl_core::infrastructure::transport::{Transport, TransportSubscription};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Re-acquires a subscription with bounded retries. With `backoff` the delay
/// grows linearly per attempt up to a cap; without it every retry waits the
/// base reconnect interval. `None` means every attempt failed (or shutdown
/// fired) and the caller should back off and come around again.
pub(crate) async fn resubscribe(
    transport: &Arc<dyn Transport>,
    shutdown: &mut broadcast::Receiver<()>,
    max_attempts: usize,
    backoff: bool,
) -> Option<TransportSubscription> {
    for attempt in 0..max_attempts {
        match transport.subscribe().await {
            Ok(subscription) => {
                if attempt > 0 {
                    info!("resubscribed to topic attempt={}", attempt + 1);
                }
                return Some(subscription);
            }
            Err(err) => {
                warn!("resubscribe attempt {}/{} failed error={err}", attempt + 1, max_attempts);
                let delay = if backoff {
                    (RECONNECT_TIMEOUT * (attempt as u32 + 1)).min(RESUBSCRIBE_BACKOFF_CAP)
                } else {
                    RECONNECT_TIMEOUT
                };
                tokio::select! {
                    _ = shutdown.recv() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    error!("failed to resubscribe after {max_attempts} attempts");
    None
}
