use libp2p::Multiaddr;
use log::info;
use sibyl_core::domain::signing::EthSigner;
use sibyl_core::foundation::error::OracleError;
use sibyl_core::infrastructure::config::{SignerConfig, LOG_FILTER_ENV};
use sibyl_core::infrastructure::logging::init_logger;
use sibyl_core::infrastructure::transport::Transport;
use sibyl_service::service::SignerNode;
use sibyl_service::transport::{GossipConfig, GossipTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_logger(&std::env::var(LOG_FILTER_ENV).unwrap_or_else(|_| "info".to_string()));

    let config = SignerConfig::from_env()?;
    let signer = EthSigner::from_secret_bytes(&config.private_key)?;
    info!("signer starting topic={} address={}", config.topic, signer.address());

    let bootstrap = config
        .bootstrap
        .as_deref()
        .map(|raw| raw.parse::<Multiaddr>())
        .transpose()
        .map_err(|err| OracleError::Config(format!("invalid BOOTSTRAP_NODE: {err}")))?;

    let transport: Arc<dyn Transport> = GossipTransport::spawn(GossipConfig {
        private_key: config.private_key.clone(),
        topic: config.topic.clone(),
        listen_port: None,
        bootstrap,
    })
    .await?;

    let node = SignerNode::new(transport, signer);
    let (shutdown, _) = broadcast::channel(1);
    let tasks = node.start(&shutdown);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown.send(());
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }
    Ok(())
}
