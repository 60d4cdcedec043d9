//! Gossipsub transport over a tokio libp2p swarm.
//!
//! The swarm is owned by a single task; everything else talks to it over a
//! command channel, which is what makes `publish` safe to call from any
//! loop. Inbound topic messages are forwarded to the current subscriber
//! channel; re-subscribing replaces that channel, so exactly one reader owns
//! the stream at a time.

use async_trait::async_trait;
use futures_util::StreamExt;
use libp2p::gossipsub::{self, IdentTopic, MessageAuthenticity, ValidationMode};
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, identity, noise, ping, tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder};
use log::{info, warn};
use sibyl_core::foundation::constants::PEER_EVICTION_WINDOW;
use sibyl_core::foundation::error::{OracleError, Result as OracleResult};
use sibyl_core::infrastructure::transport::{Transport, TransportSubscription};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

const PROTOCOL_VERSION: &str = "sibyl/1.0.0";
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(120);
const INBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(NetworkBehaviour)]
struct NodeBehaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

enum Command {
    Publish { payload: Vec<u8>, reply: oneshot::Sender<OracleResult<()>> },
    Subscribe { reply: oneshot::Sender<mpsc::Receiver<Vec<u8>>> },
    PeerCount { reply: oneshot::Sender<usize> },
    Reconnect { reply: oneshot::Sender<usize> },
    EvictStale,
}

#[derive(Clone, Debug)]
pub struct GossipConfig {
    /// secp256k1 host identity; also the long-lived on-wire identity.
    pub private_key: Vec<u8>,
    pub topic: String,
    /// Fixed listen port for coordinators; `None` picks an ephemeral port.
    pub listen_port: Option<u16>,
    /// Multiaddress dialed at startup and on reconnection sweeps.
    pub bootstrap: Option<Multiaddr>,
}

pub struct GossipTransport {
    commands: mpsc::Sender<Command>,
}

fn transport_err(err: impl Display) -> OracleError {
    OracleError::Transport { operation: "gossip".to_string(), details: err.to_string() }
}

fn channel_closed() -> OracleError {
    OracleError::Transport { operation: "command".to_string(), details: "gossip task stopped".to_string() }
}

impl GossipTransport {
    pub async fn spawn(config: GossipConfig) -> OracleResult<Arc<Self>> {
        let mut key_bytes = config.private_key.clone();
        let secret = identity::secp256k1::SecretKey::try_from_bytes(&mut key_bytes)
            .map_err(|err| OracleError::Config(format!("invalid transport key: {err}")))?;
        let keypair: identity::Keypair = identity::secp256k1::Keypair::from(secret).into();
        let local_peer_id = PeerId::from(keypair.public());

        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(tcp::Config::default().nodelay(true), noise::Config::new, yamux::Config::default)
            .map_err(transport_err)?
            .with_behaviour(|key| {
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .validation_mode(ValidationMode::Strict)
                    .build()
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
                let gossipsub = gossipsub::Behaviour::new(MessageAuthenticity::Signed(key.clone()), gossipsub_config)?;
                let identify = identify::Behaviour::new(identify::Config::new(PROTOCOL_VERSION.to_string(), key.public()));
                Ok(NodeBehaviour { gossipsub, identify, ping: ping::Behaviour::default() })
            })
            .map_err(transport_err)?
            .with_swarm_config(|swarm_config| swarm_config.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
            .build();

        let topic = IdentTopic::new(&config.topic);
        swarm.behaviour_mut().gossipsub.subscribe(&topic).map_err(transport_err)?;

        let listen: Multiaddr =
            format!("/ip4/0.0.0.0/tcp/{}", config.listen_port.unwrap_or(0)).parse().map_err(transport_err)?;
        swarm.listen_on(listen).map_err(transport_err)?;

        if let Some(addr) = &config.bootstrap {
            info!("dialing bootstrap node addr={addr}");
            if let Err(err) = swarm.dial(addr.clone()) {
                warn!("bootstrap dial failed addr={addr} error={err}");
            }
        }

        let (commands, command_rx) = mpsc::channel(64);
        tokio::spawn(swarm_task(swarm, topic, config.bootstrap, local_peer_id, command_rx));
        info!("gossip host started peer_id={local_peer_id} topic={}", config.topic);
        Ok(Arc::new(Self { commands }))
    }

    async fn round_trip<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> OracleResult<T> {
        self.commands.send(command).await.map_err(|_| channel_closed())?;
        reply.await.map_err(|_| channel_closed())
    }
}

#[async_trait]
impl Transport for GossipTransport {
    async fn publish(&self, payload: Vec<u8>) -> OracleResult<()> {
        let (reply, rx) = oneshot::channel();
        self.round_trip(Command::Publish { payload, reply }, rx).await?
    }

    async fn subscribe(&self) -> OracleResult<TransportSubscription> {
        let (reply, rx) = oneshot::channel();
        let mut receiver = self.round_trip(Command::Subscribe { reply }, rx).await?;
        let stream = async_stream::stream! {
            while let Some(payload) = receiver.recv().await {
                yield Ok(payload);
            }
        };
        Ok(TransportSubscription::new(Box::pin(stream)))
    }

    async fn peer_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.round_trip(Command::PeerCount { reply }, rx).await.unwrap_or(0)
    }

    async fn reconnect_known_peers(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.round_trip(Command::Reconnect { reply }, rx).await.unwrap_or(0)
    }

    async fn evict_stale_peers(&self) {
        let _ = self.commands.send(Command::EvictStale).await;
    }
}

async fn swarm_task(
    mut swarm: Swarm<NodeBehaviour>,
    topic: IdentTopic,
    bootstrap: Option<Multiaddr>,
    local_peer_id: PeerId,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut subscriber: Option<mpsc::Sender<Vec<u8>>> = None;
    let mut known_peers: HashMap<PeerId, Instant> = HashMap::new();
    let mut address_book: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => {
                // Every handle is gone; nothing left to serve.
                let Some(command) = command else { return };
                match command {
                    Command::Publish { payload, reply } => {
                        let result = swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(topic.clone(), payload)
                            .map(|_| ())
                            .map_err(|err| OracleError::Transport {
                                operation: "publish".to_string(),
                                details: err.to_string(),
                            });
                        let _ = reply.send(result);
                    }
                    Command::Subscribe { reply } => {
                        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
                        subscriber = Some(tx);
                        let _ = reply.send(rx);
                    }
                    Command::PeerCount { reply } => {
                        let _ = reply.send(swarm.connected_peers().count());
                    }
                    Command::Reconnect { reply } => {
                        let connected: HashSet<PeerId> = swarm.connected_peers().copied().collect();
                        let mut dialed = 0usize;
                        for (peer, addrs) in &address_book {
                            if *peer == local_peer_id || connected.contains(peer) {
                                continue;
                            }
                            for addr in addrs {
                                match swarm.dial(addr.clone()) {
                                    Ok(()) => {
                                        dialed += 1;
                                        break;
                                    }
                                    Err(err) => warn!("reconnect dial failed peer={peer} addr={addr} error={err}"),
                                }
                            }
                        }
                        if let Some(addr) = &bootstrap {
                            if connected.is_empty() {
                                match swarm.dial(addr.clone()) {
                                    Ok(()) => dialed += 1,
                                    Err(err) => warn!("bootstrap redial failed addr={addr} error={err}"),
                                }
                            }
                        }
                        let _ = reply.send(dialed);
                    }
                    Command::EvictStale => {
                        let now = Instant::now();
                        known_peers.retain(|_, last_seen| now.duration_since(*last_seen) <= PEER_EVICTION_WINDOW);
                    }
                }
            }
            event = swarm.select_next_some() => match event {
                SwarmEvent::NewListenAddr { address, .. } => {
                    info!("listening on {address}/p2p/{local_peer_id}");
                }
                SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                    known_peers.insert(peer_id, Instant::now());
                    info!("new peer connected peer={peer_id}");
                }
                SwarmEvent::ConnectionClosed { peer_id, .. } => {
                    info!("peer disconnected peer={peer_id}");
                }
                SwarmEvent::Behaviour(NodeBehaviourEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
                    let closed = match &subscriber {
                        Some(tx) => match tx.try_send(message.data) {
                            Ok(()) => false,
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!("inbound queue full, dropping gossip message");
                                false
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => true,
                        },
                        None => false,
                    };
                    if closed {
                        subscriber = None;
                    }
                }
                SwarmEvent::Behaviour(NodeBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. })) => {
                    address_book.insert(peer_id, info.listen_addrs);
                }
                _ => {}
            }
        }
    }
}
