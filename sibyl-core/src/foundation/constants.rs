use std::time::Duration;

// Publish path.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
pub const PUBLISH_RETRIES: usize = 3;
pub const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(2);

// Subscription supervision.
pub const SUBSCRIPTION_READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const SIGNER_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const RESUBSCRIBE_BACKOFF_CAP: Duration = Duration::from_secs(30);
pub const MAX_RECONNECT_ATTEMPTS: usize = 10;
pub const SIGNER_MAX_RECONNECT_ATTEMPTS: usize = 30;

// Coordinator tickers.
pub const REBROADCAST_INTERVAL: Duration = Duration::from_secs(5);
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const PENDING_EXPIRY: Duration = Duration::from_secs(5 * 60);

// Peer supervision.
pub const PEER_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);
pub const PEER_EVICTION_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(10);

// Health monitor.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const MESSAGE_SILENCE_LIMIT: Duration = Duration::from_secs(5 * 60);
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

// Boundaries.
pub const PRICE_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_COLLECTION_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_LISTEN_PORT: u16 = 4001;
pub const DEFAULT_RPC_PORT: u16 = 8080;
