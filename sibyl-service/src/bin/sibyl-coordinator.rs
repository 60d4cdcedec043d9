use log::{info, warn};
use sibyl_core::aggregator::{MockPriceSource, PriceAggregator, PriceSource};
use sibyl_core::domain::schema::{load_data_structures, MessageFactory};
use sibyl_core::foundation::constants::PRICE_FETCH_TIMEOUT;
use sibyl_core::infrastructure::config::{CoordinatorConfig, LOG_FILTER_ENV};
use sibyl_core::infrastructure::logging::init_logger;
use sibyl_core::infrastructure::storage::{RocksStore, Store};
use sibyl_core::infrastructure::transport::Transport;
use sibyl_service::api::{self, ApiState};
use sibyl_service::service::{CollectionWorker, Coordinator, RequestPublisher};
use sibyl_service::transport::{GossipConfig, GossipTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const QUOTE_STRUCTURE_KEY: &str = "stock_quote";
const DEFAULT_DESTINATION_CHAIN: u64 = 1;

fn base_price_for(ticker: &str) -> f64 {
    match ticker {
        "SBER" => 300.0,
        _ => 100.0,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_logger(&std::env::var(LOG_FILTER_ENV).unwrap_or_else(|_| "info".to_string()));

    let config = CoordinatorConfig::from_env()?;
    info!(
        "coordinator starting topic={} trusted_signers={} threshold={}",
        config.topic,
        config.trusted.len(),
        config.trusted.threshold()
    );

    info!("opening database path={}", config.db_path.display());
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(&config.db_path)?);

    let transport: Arc<dyn Transport> = GossipTransport::spawn(GossipConfig {
        private_key: config.private_key.clone(),
        topic: config.topic.clone(),
        listen_port: Some(config.listen_port),
        bootstrap: None,
    })
    .await?;

    let coordinator = Coordinator::new(transport.clone(), store.clone(), config.trusted.clone());
    let (shutdown, _) = broadcast::channel(1);
    let mut tasks = coordinator.start(&shutdown);

    match load_data_structures(&config.data_structures_path) {
        Err(err) => warn!("failed to load data structures error={err}; data collection disabled"),
        Ok(structures) => {
            let factory = MessageFactory::new(structures);
            let publisher = Arc::new(RequestPublisher::new(transport.clone(), store.clone(), coordinator.clone()));
            let mut started = 0usize;
            for ticker in &config.tickers {
                let builder = match factory.quote_builder(QUOTE_STRUCTURE_KEY, ticker, DEFAULT_DESTINATION_CHAIN) {
                    Ok(builder) => builder,
                    Err(err) => {
                        warn!("no message builder for ticker={ticker} error={err}");
                        continue;
                    }
                };
                let sources: Vec<Box<dyn PriceSource>> =
                    vec![Box::new(MockPriceSource::new(base_price_for(ticker), 0.01))];
                let aggregator = PriceAggregator::new(sources, PRICE_FETCH_TIMEOUT);
                let worker =
                    CollectionWorker::new(ticker.clone(), aggregator, builder, publisher.clone(), config.collection_interval);
                tasks.push(tokio::spawn(worker.run(shutdown.subscribe())));
                started += 1;
            }
            info!("data collection workers started count={started}");
        }
    }

    let api_state = Arc::new(ApiState { store: store.clone(), threshold: coordinator.threshold() });
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.rpc_port));
    let api_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(err) = api::serve(api_addr, api_state, api_shutdown).await {
            warn!("http api stopped error={err}");
        }
    }));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown.send(());
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }
    if let Err(err) = store.flush() {
        warn!("error flushing store error={err}");
    }
    info!("shutdown complete");
    Ok(())
}
