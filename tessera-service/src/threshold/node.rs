//! The cosigner node: the peer-facing half of the threshold protocol.
//!
//! Handles `GetNonces` and `SetNoncesAndSign` from the current leader,
//! re-running the double-sign guard against the local store before any
//! partial signature leaves this process, and routes raft and admin
//! traffic to the election state machine.

use crate::cluster::messages::{
    NonceCommitment, PeerRequest, PeerResponse, SetNoncesAndSign,
};
use crate::cluster::raft::RaftNode;
use crate::cluster::registry::Registry;
use crate::cluster::server::ClusterHandler;
use crate::cluster::PeerClient;
use crate::threshold::session::SessionTable;
use async_trait::async_trait;
use curve25519_dalek::scalar::Scalar;
use log::{debug, error, info, warn};
use rand::rngs::OsRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::domain::guard::{check_sign_request, GuardDecision};
use tessera_core::domain::nonce::{self, NonceOffer};
use tessera_core::domain::threshold::{self, KeyShard};
use tessera_core::domain::vote::SignState;
use tessera_core::domain::SessionKey;
use tessera_core::domain::ecies::EciesKeypair;
use tessera_core::foundation::{Result, ShardId, SignerError};
use tessera_core::infrastructure::storage::SignStateStore;

pub struct CosignerNode {
    registry: Arc<Registry>,
    key_shard: KeyShard,
    ecies: EciesKeypair,
    store: Arc<dyn SignStateStore>,
    raft: Arc<RaftNode>,
    client: Arc<PeerClient>,
    sessions: Arc<SessionTable>,
    // A failed high-water-mark write means this cosigner can no longer
    // prove it will not double sign; it stops signing until an operator
    // intervenes.
    storage_fatal: AtomicBool,
}

impl CosignerNode {
    pub fn new(
        registry: Arc<Registry>,
        key_shard: KeyShard,
        ecies: EciesKeypair,
        store: Arc<dyn SignStateStore>,
        raft: Arc<RaftNode>,
        client: Arc<PeerClient>,
        sessions: Arc<SessionTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            key_shard,
            ecies,
            store,
            raft,
            client,
            sessions,
            storage_fatal: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SignStateStore> {
        &self.store
    }

    pub fn raft(&self) -> &Arc<RaftNode> {
        &self.raft
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    pub fn group_pubkey(&self) -> [u8; 32] {
        self.key_shard.group_pubkey
    }

    pub fn is_halted(&self) -> bool {
        self.storage_fatal.load(Ordering::SeqCst)
    }

    fn ensure_signing_allowed(&self) -> Result<()> {
        if self.is_halted() {
            return Err(SignerError::storage("sign state", "halted after failed high-water-mark commit"));
        }
        Ok(())
    }

    fn halt_on_storage_error(&self, err: &SignerError) {
        if matches!(err, SignerError::StorageError { .. }) {
            error!("halting signer shard_id={}: {}", self.registry.own_shard(), err);
            self.storage_fatal.store(true, Ordering::SeqCst);
        }
    }

    /// Step-3 answer: fresh nonce shards for this session, encrypted per
    /// recipient.
    pub fn build_offer(&self, session: &SessionKey) -> Result<NonceOffer> {
        self.ensure_signing_allowed()?;
        if self.sessions.is_used(session) {
            return Err(SignerError::NonceAlreadyUsed);
        }
        debug!("generating nonce offer session={}", session);
        nonce::generate_offer(
            self.registry.own_shard(),
            self.registry.threshold(),
            self.registry.total(),
            &self.registry.ecies_recipients(),
            &mut OsRng,
        )
    }

    /// Step-5 answer: re-run the guard, durably advance the local mark,
    /// combine the received nonce shards, and return the partial
    /// signature. Refuses a second invocation for the same session.
    pub fn produce_partial(&self, msg: &SetNoncesAndSign) -> Result<(ShardId, [u8; 32])> {
        self.ensure_signing_allowed()?;

        let own_shard = self.registry.own_shard();
        if msg.request.session_key() != msg.session {
            return Err(SignerError::DecodeError("session key does not match the request".to_string()));
        }
        if !msg.recruits.contains(&own_shard) {
            return Err(SignerError::ShardMismatch { expected: own_shard, actual: msg.recruits.first().copied().unwrap_or(0) });
        }
        if msg.recruits.len() != usize::from(self.registry.threshold()) {
            return Err(SignerError::ThresholdNotMet {
                required: usize::from(self.registry.threshold()),
                received: msg.recruits.len(),
            });
        }

        // One shard and one commitment per recruit, no extras.
        let mut sorted_recruits = msg.recruits.clone();
        sorted_recruits.sort_unstable();
        sorted_recruits.dedup();
        if sorted_recruits.len() != msg.recruits.len() {
            return Err(SignerError::DecodeError("duplicate recruit ids".to_string()));
        }
        let mut commitment_origins: Vec<ShardId> = msg.commitments.iter().map(|c| c.origin).collect();
        commitment_origins.sort_unstable();
        if commitment_origins != sorted_recruits {
            return Err(SignerError::DecodeError("commitments do not match the recruit set".to_string()));
        }
        let mut shard_origins: Vec<ShardId> = msg.shards.iter().map(|s| s.origin).collect();
        shard_origins.sort_unstable();
        if shard_origins != sorted_recruits {
            return Err(SignerError::DecodeError("nonce shards do not match the recruit set".to_string()));
        }

        if self.sessions.is_used(&msg.session) {
            return Err(SignerError::NonceAlreadyUsed);
        }

        // The guard runs on every participant, not only the leader.
        let hwm = self.store.load(&msg.request.chain_id)?;
        match check_sign_request(&msg.request, hwm.as_ref())? {
            GuardDecision::Sign => {}
            GuardDecision::Replay { .. } | GuardDecision::ReplayWithTimestamp { .. } => {
                return Err(SignerError::Message("request already committed at this mark".to_string()));
            }
        }

        // Advance the mark durably before any partial signature exists.
        if let Err(err) = self.store.commit(&msg.request.chain_id, &SignState::advancing_to(&msg.request)) {
            self.halt_on_storage_error(&err);
            return Err(err);
        }

        let received: Vec<Scalar> = msg
            .shards
            .iter()
            .map(|shard| nonce::decrypt_shard(&self.ecies, &shard.as_encrypted_shard(own_shard)))
            .collect::<Result<_>>()?;
        let nonce_share = nonce::combine_shards(&received);

        let commitments: Vec<[u8; 32]> = msg.commitments.iter().map(|c| c.commitment).collect();
        let nonce_point = nonce::aggregate_commitments(&commitments)?;
        let challenge =
            threshold::challenge(&nonce_point.compress().to_bytes(), &self.key_shard.group_pubkey, &msg.request.signed_bytes);
        let partial = threshold::partial_signature(&nonce_share, &challenge, &self.key_shard);

        if !self.sessions.mark_used(&msg.session) {
            return Err(SignerError::NonceAlreadyUsed);
        }
        info!(
            "produced partial signature shard_id={} session={} height={} round={}",
            own_shard, msg.session, msg.request.height, msg.request.round
        );
        Ok((own_shard, partial.to_bytes()))
    }

    async fn handle_transfer(&self, target: ShardId) -> PeerResponse {
        if target == self.registry.own_shard() {
            info!("leadership transfer: campaigning shard_id={}", target);
            self.raft.campaign_now();
            return PeerResponse::TransferAccepted;
        }
        if self.registry.get(target).is_none() {
            return PeerResponse::error(
                crate::cluster::messages::PeerErrorKind::Other,
                format!("unknown transfer target {}", target),
            );
        }
        if self.raft.is_leader() {
            self.raft.step_down();
        }
        match self.client.call(target, PeerRequest::TransferLeadership { target }).await {
            Ok(response) => response,
            Err(err) => {
                warn!("leadership transfer to shard {} failed: {}", target, err);
                PeerResponse::from_error(&err)
            }
        }
    }
}

#[async_trait]
impl ClusterHandler for CosignerNode {
    async fn handle(&self, sender: ShardId, request: PeerRequest) -> PeerResponse {
        match request {
            PeerRequest::Ping => PeerResponse::Pong { shard_id: self.registry.own_shard() },
            PeerRequest::GetLeader => {
                let (leader, term) = self.raft.current_leader();
                PeerResponse::Leader { leader, term }
            }
            PeerRequest::TransferLeadership { target } => self.handle_transfer(target).await,
            PeerRequest::RequestVote(request) => self.raft.handle_request_vote(request),
            PeerRequest::AppendEntries(request) => self.raft.handle_append_entries(request),
            PeerRequest::GetNonces { session } => match self.build_offer(&session) {
                Ok(offer) => PeerResponse::Nonces(offer),
                Err(err) => {
                    debug!("refusing nonce request from shard {}: {}", sender, err);
                    PeerResponse::from_error(&err)
                }
            },
            PeerRequest::SetNoncesAndSign(msg) => match self.produce_partial(&msg) {
                Ok((shard_id, partial)) => PeerResponse::Partial { shard_id, partial },
                Err(err) => {
                    warn!("refusing partial signature for shard {}: {}", sender, err);
                    PeerResponse::from_error(&err)
                }
            },
        }
    }
}

/// Expose the commitments of the recruit subset, in recruit order.
pub fn recruit_commitments(offers: &[(ShardId, NonceOffer)], recruits: &[ShardId]) -> Vec<NonceCommitment> {
    recruits
        .iter()
        .filter_map(|shard_id| {
            offers
                .iter()
                .find(|(origin, _)| origin == shard_id)
                .map(|(origin, offer)| NonceCommitment { origin: *origin, commitment: offer.commitment })
        })
        .collect()
}
