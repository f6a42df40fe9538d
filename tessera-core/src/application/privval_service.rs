use crate::application::PrivValidator;
use crate::domain::vote::SignKind;
use crate::foundation::{ChainId, SignerError};
use crate::infrastructure::privval::proto::{
    privval_message, public_key, PingResponse, PrivvalMessage, Proposal, PubKeyResponse, PublicKey, RemoteSignerError,
    SignProposalRequest, SignVoteRequest, SignedProposalResponse, SignedVoteResponse, Vote,
};
use crate::infrastructure::privval::{sign_request_from_proposal, sign_request_from_vote, timestamp_from_nanos};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Per-classification request counters, logged rather than exported.
#[derive(Debug, Default)]
pub struct RequestCounters {
    pub signed_votes: AtomicU64,
    pub signed_proposals: AtomicU64,
    pub beyond_block_rejects: AtomicU64,
    pub conflict_rejects: AtomicU64,
    pub failed_signs: AtomicU64,
    pub pubkey_requests: AtomicU64,
}

impl RequestCounters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Answers decoded privval requests through the signing façade.
///
/// Every request produces a response, even on error, so the sentry's
/// channel stays drained.
pub struct PrivvalService {
    validator: Arc<dyn PrivValidator>,
    counters: RequestCounters,
    last_precommit_height: Mutex<HashMap<ChainId, u64>>,
}

impl PrivvalService {
    pub fn new(validator: Arc<dyn PrivValidator>) -> Self {
        Self { validator, counters: RequestCounters::default(), last_precommit_height: Mutex::new(HashMap::new()) }
    }

    pub fn counters(&self) -> &RequestCounters {
        &self.counters
    }

    pub async fn handle(&self, message: PrivvalMessage) -> PrivvalMessage {
        let sum = match message.sum {
            Some(sum) => sum,
            None => {
                warn!("empty privval message");
                return PrivvalMessage { sum: None };
            }
        };
        match sum {
            privval_message::Sum::SignVoteRequest(request) => self.handle_sign_vote(request).await,
            privval_message::Sum::SignProposalRequest(request) => self.handle_sign_proposal(request).await,
            privval_message::Sum::PubKeyRequest(_) => self.handle_pub_key(),
            privval_message::Sum::PingRequest(_) => {
                PrivvalMessage { sum: Some(privval_message::Sum::PingResponse(PingResponse {})) }
            }
            other => {
                warn!("unexpected privval request: {:?}", other);
                PrivvalMessage { sum: None }
            }
        }
    }

    async fn handle_sign_vote(&self, request: SignVoteRequest) -> PrivvalMessage {
        let chain_id = ChainId::from(request.chain_id.clone());
        let vote = request.vote.unwrap_or_default();

        let response = |vote: Option<Vote>, error: Option<RemoteSignerError>| PrivvalMessage {
            sum: Some(privval_message::Sum::SignedVoteResponse(SignedVoteResponse { vote, error })),
        };

        let sign_request = match sign_request_from_vote(&chain_id, &vote) {
            Ok(sign_request) => sign_request,
            Err(err) => {
                error!("malformed vote request chain_id={} error={}", chain_id, err);
                return response(None, Some(remote_error(&err)));
            }
        };

        match self.validator.sign(sign_request.clone()).await {
            Ok(outcome) => {
                let mut signed = vote;
                signed.signature = outcome.signature;
                signed.timestamp = Some(timestamp_from_nanos(outcome.timestamp_nanos));
                info!(
                    "signed vote chain_id={} height={} round={} type={} sig={}",
                    chain_id,
                    signed.height,
                    signed.round,
                    sign_request.kind,
                    hex::encode(&signed.signature[..6.min(signed.signature.len())]),
                );
                self.observe_signed_vote(&chain_id, &sign_request.kind, sign_request.height);
                response(Some(signed), None)
            }
            Err(err) => {
                self.observe_sign_failure(&chain_id, "vote", vote.height, vote.round, &err);
                response(None, Some(remote_error(&err)))
            }
        }
    }

    async fn handle_sign_proposal(&self, request: SignProposalRequest) -> PrivvalMessage {
        let chain_id = ChainId::from(request.chain_id.clone());
        let proposal = request.proposal.unwrap_or_default();

        let response = |proposal: Option<Proposal>, error: Option<RemoteSignerError>| PrivvalMessage {
            sum: Some(privval_message::Sum::SignedProposalResponse(SignedProposalResponse { proposal, error })),
        };

        let sign_request = match sign_request_from_proposal(&chain_id, &proposal) {
            Ok(sign_request) => sign_request,
            Err(err) => {
                error!("malformed proposal request chain_id={} error={}", chain_id, err);
                return response(None, Some(remote_error(&err)));
            }
        };

        match self.validator.sign(sign_request).await {
            Ok(outcome) => {
                let mut signed = proposal;
                signed.signature = outcome.signature;
                signed.timestamp = Some(timestamp_from_nanos(outcome.timestamp_nanos));
                info!(
                    "signed proposal chain_id={} height={} round={} sig={}",
                    chain_id,
                    signed.height,
                    signed.round,
                    hex::encode(&signed.signature[..6.min(signed.signature.len())]),
                );
                RequestCounters::bump(&self.counters.signed_proposals);
                response(Some(signed), None)
            }
            Err(err) => {
                self.observe_sign_failure(&chain_id, "proposal", proposal.height, proposal.round, &err);
                response(None, Some(remote_error(&err)))
            }
        }
    }

    fn handle_pub_key(&self) -> PrivvalMessage {
        RequestCounters::bump(&self.counters.pubkey_requests);
        let pub_key = PublicKey { sum: Some(public_key::Sum::Ed25519(self.validator.public_key().to_vec())) };
        PrivvalMessage {
            sum: Some(privval_message::Sum::PubKeyResponse(PubKeyResponse { pub_key: Some(pub_key), error: None })),
        }
    }

    fn observe_signed_vote(&self, chain_id: &ChainId, kind: &SignKind, height: u64) {
        RequestCounters::bump(&self.counters.signed_votes);
        if *kind != SignKind::Precommit {
            return;
        }
        let mut heights = match self.last_precommit_height.lock() {
            Ok(heights) => heights,
            Err(_) => return,
        };
        if let Some(previous) = heights.get(chain_id) {
            let step = height.saturating_sub(*previous);
            if step > 1 {
                warn!("missed {} precommit(s) chain_id={} previous_height={} height={}", step - 1, chain_id, previous, height);
            }
        }
        heights.insert(chain_id.clone(), height);
    }

    fn observe_sign_failure(&self, chain_id: &ChainId, what: &str, height: i64, round: i32, err: &SignerError) {
        match err {
            SignerError::BeyondBlock { .. } => {
                let total = RequestCounters::bump(&self.counters.beyond_block_rejects);
                debug!(
                    "rejecting {} sign request chain_id={} height={} round={} reason={} total_rejects={}",
                    what, chain_id, height, round, err, total
                );
            }
            SignerError::ConflictingData { .. } => {
                RequestCounters::bump(&self.counters.conflict_rejects);
                error!(
                    "conflicting {} sign request chain_id={} height={} round={} error={}",
                    what, chain_id, height, round, err
                );
            }
            _ => {
                RequestCounters::bump(&self.counters.failed_signs);
                error!("failed to sign {} chain_id={} height={} round={} error={}", what, chain_id, height, round, err);
            }
        }
    }
}

fn remote_error(err: &SignerError) -> RemoteSignerError {
    RemoteSignerError { code: err.wire_code(), description: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::SingleSigner;
    use crate::infrastructure::privval::proto::{BlockId, PartSetHeader, SIGNED_MSG_TYPE_PREVOTE};
    use crate::infrastructure::storage::MemoryStateStore;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn service() -> PrivvalService {
        let key = SigningKey::generate(&mut OsRng);
        PrivvalService::new(Arc::new(SingleSigner::new(key, Arc::new(MemoryStateStore::new()))))
    }

    fn vote_request(height: i64, hash: &[u8], ts: u64) -> PrivvalMessage {
        PrivvalMessage {
            sum: Some(privval_message::Sum::SignVoteRequest(SignVoteRequest {
                chain_id: "test-chain".to_string(),
                vote: Some(Vote {
                    r#type: SIGNED_MSG_TYPE_PREVOTE,
                    height,
                    round: 0,
                    block_id: Some(BlockId {
                        hash: hash.to_vec(),
                        part_set_header: Some(PartSetHeader { total: 1, hash: hash.to_vec() }),
                    }),
                    timestamp: Some(timestamp_from_nanos(ts)),
                    validator_address: vec![0xAB; 20],
                    validator_index: 0,
                    signature: Vec::new(),
                }),
            })),
        }
    }

    fn signed_vote(response: PrivvalMessage) -> SignedVoteResponse {
        match response.sum {
            Some(privval_message::Sum::SignedVoteResponse(inner)) => inner,
            other => panic!("expected signed vote response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sign_vote_round_trip() {
        let service = service();
        let response = signed_vote(service.handle(vote_request(10, b"block-a", 100)).await);
        assert!(response.error.is_none());
        let vote = response.vote.expect("vote");
        assert_eq!(vote.signature.len(), 64);
        assert_eq!(service.counters().signed_votes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn beyond_block_reports_error_and_counts() {
        let service = service();
        signed_vote(service.handle(vote_request(10, b"block-a", 100)).await);
        let response = signed_vote(service.handle(vote_request(9, b"block-b", 200)).await);
        let error = response.error.expect("error");
        assert!(error.description.contains("beyond block"));
        assert!(response.vote.is_none());
        assert_eq!(service.counters().beyond_block_rejects.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn conflicting_vote_reports_error() {
        let service = service();
        signed_vote(service.handle(vote_request(10, b"block-a", 100)).await);
        let response = signed_vote(service.handle(vote_request(10, b"block-b", 100)).await);
        assert!(response.error.is_some());
        assert_eq!(service.counters().conflict_rejects.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn replay_returns_identical_signature() {
        let service = service();
        let first = signed_vote(service.handle(vote_request(10, b"block-a", 100)).await).vote.expect("vote");
        let second = signed_vote(service.handle(vote_request(10, b"block-a", 100)).await).vote.expect("vote");
        assert_eq!(first.signature, second.signature);
    }

    #[tokio::test]
    async fn timestamp_replay_returns_stored_timestamp() {
        let service = service();
        let first = signed_vote(service.handle(vote_request(10, b"block-a", 100)).await).vote.expect("vote");
        let retry = signed_vote(service.handle(vote_request(10, b"block-a", 999)).await).vote.expect("vote");
        assert_eq!(first.signature, retry.signature);
        assert_eq!(retry.timestamp, Some(timestamp_from_nanos(100)));
    }

    #[tokio::test]
    async fn pub_key_and_ping_are_answered() {
        let service = service();
        let response = service
            .handle(PrivvalMessage {
                sum: Some(privval_message::Sum::PubKeyRequest(crate::infrastructure::privval::proto::PubKeyRequest {
                    chain_id: "test-chain".to_string(),
                })),
            })
            .await;
        match response.sum {
            Some(privval_message::Sum::PubKeyResponse(inner)) => {
                assert!(matches!(inner.pub_key.and_then(|k| k.sum), Some(public_key::Sum::Ed25519(bytes)) if bytes.len() == 32));
            }
            other => panic!("expected pub key response, got {:?}", other),
        }

        let pong = service
            .handle(PrivvalMessage {
                sum: Some(privval_message::Sum::PingRequest(crate::infrastructure::privval::proto::PingRequest {})),
            })
            .await;
        assert!(matches!(pong.sum, Some(privval_message::Sum::PingResponse(_))));
    }
}
