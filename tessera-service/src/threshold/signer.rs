//! Leader-side session orchestration: admit, recruit, gather nonces,
//! distribute shard sets, collect partial signatures, aggregate, verify,
//! and commit the high-water mark through the replicated log.

use crate::cluster::messages::{AddressedShard, PeerErrorKind, PeerRequest, PeerResponse, SetNoncesAndSign};
use crate::cluster::PeerClient;
use crate::threshold::node::{recruit_commitments, CosignerNode};
use async_trait::async_trait;
use curve25519_dalek::scalar::Scalar;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use std::sync::Arc;
use tessera_core::application::{PrivValidator, SignedOutcome};
use tessera_core::domain::guard::{check_sign_request, GuardDecision};
use tessera_core::domain::nonce::{self, NonceOffer};
use tessera_core::domain::threshold;
use tessera_core::domain::vote::{SignRequest, SignState};
use tessera_core::foundation::{Result, ShardId, SignerError};
use tokio::time::timeout;

pub struct ThresholdSigner {
    node: Arc<CosignerNode>,
    client: Arc<PeerClient>,
    session_timeout: std::time::Duration,
}

impl ThresholdSigner {
    pub fn new(node: Arc<CosignerNode>, client: Arc<PeerClient>, session_timeout: std::time::Duration) -> Arc<Self> {
        Arc::new(Self { node, client, session_timeout })
    }

    async fn run_session(&self, request: &SignRequest) -> Result<SignedOutcome> {
        let registry = Arc::clone(self.node.registry());
        let own_shard = registry.own_shard();
        let threshold_k = registry.threshold();

        // Admit: the guard runs before any cryptographic work.
        let hwm = self.node.store().load(&request.chain_id)?;
        match check_sign_request(request, hwm.as_ref())? {
            GuardDecision::Replay { signature } => {
                debug!("replaying committed signature session={}", request.session_key());
                return Ok(SignedOutcome { signature, timestamp_nanos: request.timestamp_nanos });
            }
            GuardDecision::ReplayWithTimestamp { signature, timestamp_nanos } => {
                debug!("replaying with stored timestamp session={}", request.session_key());
                return Ok(SignedOutcome { signature, timestamp_nanos });
            }
            GuardDecision::Sign => {}
        }

        let session = request.session_key();

        // Recruit + gather: ask every sibling for nonces in parallel and
        // keep the first K - 1 that answer; self always participates.
        let own_offer = nonce::generate_offer(
            own_shard,
            threshold_k,
            registry.total(),
            &registry.ecies_recipients(),
            &mut OsRng,
        )?;

        let calls = registry.peers().map(|peer| {
            let client = Arc::clone(&self.client);
            let session = session.clone();
            let shard_id = peer.shard_id;
            async move { (shard_id, client.call(shard_id, PeerRequest::GetNonces { session }).await) }
        });
        let mut offers: Vec<(ShardId, NonceOffer)> = vec![(own_shard, own_offer)];
        for (shard_id, result) in join_all_spawned(calls).await {
            match result {
                Ok(PeerResponse::Nonces(offer)) if offer.origin == shard_id => offers.push((shard_id, offer)),
                Ok(PeerResponse::Nonces(_)) => warn!("shard {} answered nonces for a different origin", shard_id),
                Ok(PeerResponse::Error { kind, message }) => {
                    debug!("shard {} refused nonces kind={:?}: {}", shard_id, kind, message)
                }
                Ok(other) => warn!("unexpected nonce response from shard {}: {:?}", shard_id, other),
                Err(err) => debug!("shard {} unreachable for nonces: {}", shard_id, err),
            }
        }

        if offers.len() < usize::from(threshold_k) {
            return Err(SignerError::QuorumTimeout { required: usize::from(threshold_k), responsive: offers.len() });
        }
        offers.truncate(usize::from(threshold_k));
        let recruits: Vec<ShardId> = offers.iter().map(|(shard_id, _)| *shard_id).collect();
        info!("session {} recruited cosigners {:?}", session, recruits);

        let commitments = recruit_commitments(&offers, &recruits);
        let commitment_bytes: Vec<[u8; 32]> = commitments.iter().map(|c| c.commitment).collect();
        let nonce_point = nonce::aggregate_commitments(&commitment_bytes)?;

        // Distribute shard sets and collect partial signatures. The leader
        // produces its own locally through the same guarded path.
        let build_msg = |recipient: ShardId| -> Result<SetNoncesAndSign> {
            let shards: Vec<AddressedShard> = offers
                .iter()
                .filter_map(|(_, offer)| AddressedShard::from_offer(offer, recipient))
                .collect();
            if shards.len() != recruits.len() {
                return Err(SignerError::crypto("nonce distribution", format!("missing shard for recipient {}", recipient)));
            }
            Ok(SetNoncesAndSign {
                session: session.clone(),
                recruits: recruits.clone(),
                commitments: commitments.clone(),
                shards,
                request: request.clone(),
            })
        };

        let mut partials: Vec<(ShardId, Scalar)> = Vec::with_capacity(recruits.len());
        let (own_id, own_partial) = self.node.produce_partial(&build_msg(own_shard)?)?;
        partials.push((own_id, decode_partial(own_id, &own_partial)?));

        let peer_calls: Vec<_> = recruits
            .iter()
            .filter(|shard_id| **shard_id != own_shard)
            .map(|shard_id| {
                let client = Arc::clone(&self.client);
                let shard_id = *shard_id;
                let msg = build_msg(shard_id);
                async move {
                    match msg {
                        Ok(msg) => (shard_id, client.call(shard_id, PeerRequest::SetNoncesAndSign(Box::new(msg))).await),
                        Err(err) => (shard_id, Err(err)),
                    }
                }
            })
            .collect();

        let mut conflict: Option<SignerError> = None;
        for (shard_id, result) in join_all_spawned(peer_calls.into_iter()).await {
            match result {
                Ok(PeerResponse::Partial { shard_id: answered, partial }) if answered == shard_id => {
                    partials.push((shard_id, decode_partial(shard_id, &partial)?));
                }
                Ok(PeerResponse::Error { kind: PeerErrorKind::Conflict, message }) => {
                    conflict = Some(SignerError::ConflictingData {
                        height: request.height,
                        round: request.round,
                        step: request.kind.step(),
                        details: format!("cosigner {}: {}", shard_id, message),
                    });
                }
                Ok(PeerResponse::Error { kind, message }) => {
                    warn!("shard {} refused to sign kind={:?}: {}", shard_id, kind, message)
                }
                Ok(other) => warn!("unexpected partial response from shard {}: {:?}", shard_id, other),
                Err(err) => warn!("shard {} unreachable for partial signature: {}", shard_id, err),
            }
        }
        if let Some(conflict) = conflict {
            return Err(conflict);
        }
        if partials.len() < usize::from(threshold_k) {
            return Err(SignerError::QuorumTimeout { required: usize::from(threshold_k), responsive: partials.len() });
        }

        let signature = threshold::aggregate(&nonce_point, &partials, threshold_k)?;
        threshold::verify(&self.node.group_pubkey(), &request.signed_bytes, &signature)?;

        // Close the TOCTOU window: re-check under the session lock right
        // before the replicated commit.
        let hwm = self.node.store().load(&request.chain_id)?;
        if let GuardDecision::Replay { signature } = check_sign_request(request, hwm.as_ref())? {
            return Ok(SignedOutcome { signature, timestamp_nanos: request.timestamp_nanos });
        }

        self.node
            .raft()
            .propose_commit(&request.chain_id, SignState::committed(request, signature.to_vec()))
            .await?;

        info!(
            "threshold signature committed chain_id={} height={} round={} kind={} recruits={:?}",
            request.chain_id, request.height, request.round, request.kind, recruits
        );
        Ok(SignedOutcome { signature: signature.to_vec(), timestamp_nanos: request.timestamp_nanos })
    }
}

fn decode_partial(shard_id: ShardId, bytes: &[u8; 32]) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
        .ok_or(SignerError::PeerUnreachable { shard_id, details: "non-canonical partial signature".to_string() })
}

#[async_trait]
impl PrivValidator for ThresholdSigner {
    async fn sign(&self, request: SignRequest) -> Result<SignedOutcome> {
        let (leader, _term) = self.node.raft().current_leader();
        if leader != Some(self.node.registry().own_shard()) {
            return Err(SignerError::NotLeader {
                leader: leader.map(|id| id.to_string()).unwrap_or_else(|| "unknown".to_string()),
            });
        }

        // Concurrent requests for the same session collapse onto one lock;
        // the second entrant re-runs admit and replays the committed
        // signature.
        let session_lock = self.node.sessions().lock_for(&request.session_key());
        let _guard = session_lock.lock().await;

        match timeout(self.session_timeout, self.run_session(&request)).await {
            Ok(result) => result,
            Err(_) => Err(SignerError::SessionTimeout { timeout_ms: self.session_timeout.as_millis() as u64 }),
        }
    }

    fn public_key(&self) -> [u8; 32] {
        self.node.group_pubkey()
    }
}

/// Spawn each call on the runtime and await them all.
async fn join_all_spawned<F, T>(calls: impl Iterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<tokio::task::JoinHandle<T>> = calls.map(tokio::spawn).collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(result) = handle.await {
            results.push(result);
        }
    }
    results
}
