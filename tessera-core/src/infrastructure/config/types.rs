use crate::domain::ecies::EciesPublicKey;
use crate::foundation::{Result, ShardId, SignerError};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which signing façade the daemon runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
    /// One process holds the whole key. Bootstrap, tests, migrations.
    Single,
    /// Shamir-sharded key across the cosigner cluster.
    #[default]
    Threshold,
}

impl std::fmt::Display for SignMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Threshold => write!(f, "threshold"),
        }
    }
}

/// One sibling cosigner in the cluster registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CosignerEntry {
    #[serde(default)]
    pub shard_id: ShardId,
    /// host:port the cosigner's cluster listener binds.
    #[serde(default)]
    pub p2p_addr: String,
    /// Hex Ed25519 key the cosigner signs cluster envelopes with.
    #[serde(default)]
    pub identity_pubkey: String,
    /// Hex X25519 key nonce shards for this cosigner are encrypted to.
    #[serde(default)]
    pub ecies_pubkey: String,
}

impl CosignerEntry {
    pub fn identity_key(&self) -> Result<VerifyingKey> {
        let bytes: [u8; 32] = hex::decode(self.identity_pubkey.trim())
            .map_err(|err| SignerError::ConfigError(format!("cosigner {} identity_pubkey: {}", self.shard_id, err)))?
            .as_slice()
            .try_into()
            .map_err(|_| SignerError::ConfigError(format!("cosigner {} identity_pubkey is not 32 bytes", self.shard_id)))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|err| SignerError::ConfigError(format!("cosigner {} identity_pubkey: {}", self.shard_id, err)))
    }

    pub fn ecies_key(&self) -> Result<EciesPublicKey> {
        let bytes: [u8; 32] = hex::decode(self.ecies_pubkey.trim())
            .map_err(|err| SignerError::ConfigError(format!("cosigner {} ecies_pubkey: {}", self.shard_id, err)))?
            .as_slice()
            .try_into()
            .map_err(|_| SignerError::ConfigError(format!("cosigner {} ecies_pubkey is not 32 bytes", self.shard_id)))?;
        Ok(EciesPublicKey(bytes))
    }
}

/// A consensus node this signer dials and serves.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChainNode {
    #[serde(default)]
    pub priv_val_addr: String,
}

fn default_grpc_timeout_ms() -> u64 {
    1500
}

fn default_raft_timeout_ms() -> u64 {
    1500
}

fn default_session_timeout_ms() -> u64 {
    5000
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThresholdSection {
    /// K: how many cosigners a signature requires.
    #[serde(default)]
    pub threshold: u8,
    /// This cosigner's shard id.
    #[serde(default)]
    pub shard_id: ShardId,
    /// Address the cluster listener binds locally.
    #[serde(default)]
    pub listen_addr: String,
    /// Deadline for one cosigner RPC (nonce fetch, partial sig, raft call).
    #[serde(default = "default_grpc_timeout_ms", alias = "grpc_timeout")]
    pub grpc_timeout_ms: u64,
    /// Leader heartbeat interval base; election timeouts are randomized
    /// multiples of this.
    #[serde(default = "default_raft_timeout_ms", alias = "raft_timeout")]
    pub raft_timeout_ms: u64,
    /// End-to-end budget for one signing session.
    #[serde(default = "default_session_timeout_ms", alias = "session_timeout")]
    pub session_timeout_ms: u64,
    #[serde(default)]
    pub cosigners: Vec<CosignerEntry>,
}

impl Default for ThresholdSection {
    fn default() -> Self {
        Self {
            threshold: 0,
            shard_id: 0,
            listen_addr: String::new(),
            grpc_timeout_ms: default_grpc_timeout_ms(),
            raft_timeout_ms: default_raft_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            cosigners: Vec::new(),
        }
    }
}

impl ThresholdSection {
    pub fn total_shards(&self) -> u8 {
        self.cosigners.len() as u8
    }

    pub fn grpc_timeout(&self) -> Duration {
        Duration::from_millis(self.grpc_timeout_ms)
    }

    pub fn raft_timeout(&self) -> Duration {
        Duration::from_millis(self.raft_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn raft_quorum(&self) -> usize {
        usize::from(self.total_shards()) / 2 + 1
    }

    pub fn entry(&self, shard_id: ShardId) -> Option<&CosignerEntry> {
        self.cosigners.iter().find(|c| c.shard_id == shard_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &CosignerEntry> {
        let own = self.shard_id;
        self.cosigners.iter().filter(move |c| c.shard_id != own)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sign_mode: SignMode,
    /// Directory holding sign-state files and, by default, key files.
    #[serde(default)]
    pub state_dir: String,
    /// Path to this cosigner's Ed25519 shard file
    /// (default `${state_dir}/shard.json`).
    #[serde(default)]
    pub shard_file: Option<String>,
    /// Path to this cosigner's ECIES keypair file
    /// (default `${state_dir}/ecies.json`).
    #[serde(default)]
    pub ecies_file: Option<String>,
    /// Path to this cosigner's cluster identity key file
    /// (default `${state_dir}/identity.json`).
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default)]
    pub chain_nodes: Vec<ChainNode>,
    #[serde(default)]
    pub threshold: ThresholdSection,
}

impl AppConfig {
    pub fn shard_file_path(&self) -> String {
        self.shard_file.clone().unwrap_or_else(|| format!("{}/shard.json", self.state_dir))
    }

    pub fn ecies_file_path(&self) -> String {
        self.ecies_file.clone().unwrap_or_else(|| format!("{}/ecies.json", self.state_dir))
    }

    pub fn identity_file_path(&self) -> String {
        self.identity_file.clone().unwrap_or_else(|| format!("{}/identity.json", self.state_dir))
    }
}
