//! Daemon wiring: build the signing façade and background tasks from a
//! validated configuration, or from injected components in tests.

use crate::cluster::{ClusterServer, PeerClient, RaftNode, Registry};
use crate::connector::SentryConnector;
use crate::threshold::{CosignerNode, SessionTable, ThresholdSigner};
use ed25519_dalek::SigningKey;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::application::{PrivValidator, PrivvalService, SingleSigner};
use tessera_core::domain::ecies::EciesKeypair;
use tessera_core::domain::threshold::KeyShard;
use tessera_core::foundation::Result;
use tessera_core::infrastructure::config::{AppConfig, SignMode};
use tessera_core::infrastructure::keys;
use tessera_core::infrastructure::storage::{FileStateStore, SignStateStore};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct ClusterNodeHandles {
    pub signer: Arc<ThresholdSigner>,
    pub node: Arc<CosignerNode>,
    pub raft: Arc<RaftNode>,
    pub client: Arc<PeerClient>,
    pub tasks: Vec<JoinHandle<()>>,
}

pub struct ClusterTimeouts {
    pub grpc: Duration,
    pub raft: Duration,
    pub session: Duration,
}

/// Assemble one cosigner's cluster machinery around an already-bound
/// listener. Shared by the daemon and the integration harness.
pub fn spawn_cluster_node(
    registry: Arc<Registry>,
    identity: Arc<SigningKey>,
    key_shard: KeyShard,
    ecies: EciesKeypair,
    store: Arc<dyn SignStateStore>,
    listener: TcpListener,
    timeouts: ClusterTimeouts,
    shutdown: watch::Receiver<bool>,
) -> ClusterNodeHandles {
    let client = Arc::new(PeerClient::new(Arc::clone(&registry), Arc::clone(&identity), timeouts.grpc));
    let raft = RaftNode::new(Arc::clone(&registry), Arc::clone(&client), Arc::clone(&store), timeouts.raft);
    let sessions = SessionTable::new();
    let node = CosignerNode::new(
        Arc::clone(&registry),
        key_shard,
        ecies,
        store,
        Arc::clone(&raft),
        Arc::clone(&client),
        sessions,
    );
    let signer = ThresholdSigner::new(Arc::clone(&node), Arc::clone(&client), timeouts.session);

    let handler: Arc<dyn crate::cluster::ClusterHandler> = node.clone() as Arc<dyn crate::cluster::ClusterHandler>;
    let server = ClusterServer::new(Arc::clone(&registry), identity, handler);
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(server.run(listener, shutdown.clone())));
    tasks.push(raft.spawn_driver(shutdown.clone()));
    tasks.push(spawn_health_pinger(Arc::clone(&client), registry, timeouts.raft, shutdown));

    ClusterNodeHandles { signer, node, raft, client, tasks }
}

/// Periodic reachability probe of every sibling cosigner; feeds the
/// client's health map and surfaces dead peers in the log.
fn spawn_health_pinger(
    client: Arc<PeerClient>,
    registry: Arc<Registry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(250)));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    for peer in registry.peers() {
                        let shard_id = peer.shard_id;
                        if let Err(err) = client.call(shard_id, crate::cluster::PeerRequest::Ping).await {
                            warn!("cosigner {} unreachable: {}", shard_id, err);
                        }
                    }
                }
            }
        }
    })
}

/// Build everything from a validated config: key material, state store,
/// the signing façade, the cluster (in threshold mode), and one connector
/// per configured chain node.
pub async fn start_from_config(config: &AppConfig, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
    let store: Arc<dyn SignStateStore> = Arc::new(FileStateStore::open(&config.state_dir)?);

    let mut tasks = Vec::new();
    let validator: Arc<dyn PrivValidator> = match config.sign_mode {
        SignMode::Single => {
            let key = keys::load_identity_key(Path::new(&config.shard_file_path()))?;
            info!("starting in single-signer mode");
            Arc::new(SingleSigner::new(key, store))
        }
        SignMode::Threshold => {
            let key_shard = keys::load_key_shard(Path::new(&config.shard_file_path()))?;
            let ecies = keys::load_ecies_keypair(Path::new(&config.ecies_file_path()))?;
            let identity = Arc::new(keys::load_identity_key(Path::new(&config.identity_file_path()))?);
            let registry = Arc::new(Registry::from_config(&config.threshold)?);

            let listener = ClusterServer::bind(&config.threshold.listen_addr).await?;
            info!(
                "starting in threshold mode shard_id={} threshold={}-of-{} listen_addr={}",
                registry.own_shard(),
                registry.threshold(),
                registry.total(),
                config.threshold.listen_addr
            );

            let handles = spawn_cluster_node(
                registry,
                identity,
                key_shard,
                ecies,
                store,
                listener,
                ClusterTimeouts {
                    grpc: config.threshold.grpc_timeout(),
                    raft: config.threshold.raft_timeout(),
                    session: config.threshold.session_timeout(),
                },
                shutdown.clone(),
            );
            tasks.extend(handles.tasks);
            handles.signer
        }
    };

    let service = Arc::new(PrivvalService::new(validator));
    for chain_node in &config.chain_nodes {
        let connector =
            SentryConnector::new(chain_node.priv_val_addr.clone(), Arc::clone(&service), shutdown.clone());
        tasks.push(connector.spawn());
    }

    Ok(tasks)
}
