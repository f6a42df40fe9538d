//! In-process cosigner cluster for integration tests: real TCP listeners
//! on ephemeral ports, memory-backed sign-state stores, fast timeouts.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::domain::ecies::EciesKeypair;
use tessera_core::domain::threshold::deal_shards;
use tessera_core::domain::vote::{SignKind, SignRequest};
use tessera_core::foundation::{ChainId, ShardId};
use tessera_core::infrastructure::config::{CosignerEntry, ThresholdSection};
use tessera_core::infrastructure::storage::MemoryStateStore;
use tessera_service::cluster::{ClusterServer, Registry};
use tessera_service::setup::{spawn_cluster_node, ClusterNodeHandles, ClusterTimeouts};
use tokio::sync::watch;

pub const TEST_CHAIN: &str = "test-chain-1";

pub struct TestNode {
    pub shard_id: ShardId,
    pub handles: ClusterNodeHandles,
    pub store: Arc<MemoryStateStore>,
    shutdown: watch::Sender<bool>,
}

impl TestNode {
    /// Stop this cosigner: listener, raft driver, and pinger all exit and
    /// the port stops accepting.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub group_pubkey: [u8; 32],
}

impl TestCluster {
    pub async fn spawn(threshold: u8, total: u8) -> Self {
        let shards = deal_shards(threshold, total, &mut OsRng).expect("deal shards");
        let group_pubkey = shards[0].group_pubkey;
        let identities: Vec<SigningKey> = (0..total).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let ecies: Vec<EciesKeypair> = (0..total).map(|_| EciesKeypair::generate()).collect();

        // Bind first so the registry can carry real ephemeral ports.
        let mut listeners = Vec::new();
        let mut addrs = Vec::new();
        for _ in 0..total {
            let listener = ClusterServer::bind("127.0.0.1:0").await.expect("bind");
            addrs.push(listener.local_addr().expect("local addr").to_string());
            listeners.push(listener);
        }

        let entries: Vec<CosignerEntry> = (0..total as usize)
            .map(|i| CosignerEntry {
                shard_id: (i + 1) as ShardId,
                p2p_addr: addrs[i].clone(),
                identity_pubkey: hex::encode(identities[i].verifying_key().to_bytes()),
                ecies_pubkey: hex::encode(ecies[i].public().0),
            })
            .collect();

        let mut nodes = Vec::new();
        for (i, (listener, shard)) in listeners.into_iter().zip(shards.into_iter()).enumerate() {
            let section = ThresholdSection {
                threshold,
                shard_id: (i + 1) as ShardId,
                listen_addr: addrs[i].clone(),
                cosigners: entries.clone(),
                ..Default::default()
            };
            let registry = Arc::new(Registry::from_config(&section).expect("registry"));
            let store = Arc::new(MemoryStateStore::new());
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let handles = spawn_cluster_node(
                registry,
                Arc::new(identities[i].clone()),
                shard,
                EciesKeypair::from_secret_bytes(*ecies[i].secret_bytes()),
                store.clone(),
                listener,
                ClusterTimeouts {
                    grpc: Duration::from_millis(500),
                    raft: Duration::from_millis(150),
                    session: Duration::from_secs(3),
                },
                shutdown_rx,
            );

            nodes.push(TestNode { shard_id: (i + 1) as ShardId, handles, store, shutdown: shutdown_tx });
        }

        TestCluster { nodes, group_pubkey }
    }

    pub fn node(&self, shard_id: ShardId) -> &TestNode {
        self.nodes.iter().find(|node| node.shard_id == shard_id).expect("unknown shard")
    }

    /// Wait until every running node agrees on the same leader.
    pub async fn wait_for_leader(&self, timeout: Duration) -> ShardId {
        self.wait_for_leader_among(timeout, &self.running_shards()).await
    }

    pub async fn wait_for_leader_among(&self, timeout: Duration, shards: &[ShardId]) -> ShardId {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let leaders: Vec<Option<ShardId>> = shards
                .iter()
                .map(|shard_id| self.node(*shard_id).handles.raft.current_leader().0)
                .collect();
            if let Some(Some(leader)) = leaders.first() {
                if leaders.iter().all(|l| *l == Some(*leader)) {
                    return *leader;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("no leader agreed within {:?}; saw {:?}", timeout, leaders);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn running_shards(&self) -> Vec<ShardId> {
        self.nodes.iter().filter(|node| !*node.shutdown.borrow()).map(|node| node.shard_id).collect()
    }

    pub fn stop_all(&self) {
        for node in &self.nodes {
            node.stop();
        }
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.stop_all();
    }
}

pub fn sign_request(height: u64, round: i32, kind: SignKind, block_id: &[u8], ts: u64) -> SignRequest {
    let mut signed_bytes = Vec::new();
    signed_bytes.extend_from_slice(&height.to_be_bytes());
    signed_bytes.extend_from_slice(&round.to_be_bytes());
    signed_bytes.push(kind.step());
    signed_bytes.extend_from_slice(block_id);
    signed_bytes.extend_from_slice(&ts.to_le_bytes());
    SignRequest {
        chain_id: ChainId::from(TEST_CHAIN),
        height,
        round,
        kind,
        block_id: block_id.to_vec(),
        timestamp_nanos: ts,
        signed_bytes,
    }
}
