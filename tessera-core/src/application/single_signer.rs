use crate::application::{PrivValidator, SignedOutcome};
use crate::domain::guard::{check_sign_request, GuardDecision};
use crate::domain::vote::{SignRequest, SignState};
use crate::foundation::Result;
use crate::infrastructure::storage::SignStateStore;
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use log::info;
use std::sync::Arc;

/// Non-threshold fallback: one process holds the whole Ed25519 key and
/// runs the guard + store directly. Same façade as the threshold signer;
/// intended for bootstrap, testing, and upgrade migrations.
pub struct SingleSigner {
    key: SigningKey,
    store: Arc<dyn SignStateStore>,
    // Serializes guard -> sign -> commit so concurrent sentries cannot
    // race past the high-water mark check.
    lock: tokio::sync::Mutex<()>,
}

impl SingleSigner {
    pub fn new(key: SigningKey, store: Arc<dyn SignStateStore>) -> Self {
        Self { key, store, lock: tokio::sync::Mutex::new(()) }
    }
}

#[async_trait]
impl PrivValidator for SingleSigner {
    async fn sign(&self, request: SignRequest) -> Result<SignedOutcome> {
        let _guard = self.lock.lock().await;

        let hwm = self.store.load(&request.chain_id)?;
        match check_sign_request(&request, hwm.as_ref())? {
            GuardDecision::Replay { signature } => {
                return Ok(SignedOutcome { signature, timestamp_nanos: request.timestamp_nanos });
            }
            GuardDecision::ReplayWithTimestamp { signature, timestamp_nanos } => {
                return Ok(SignedOutcome { signature, timestamp_nanos });
            }
            GuardDecision::Sign => {}
        }

        let signature = self.key.sign(&request.signed_bytes).to_bytes().to_vec();
        self.store.commit(&request.chain_id, &SignState::committed(&request, signature.clone()))?;
        info!(
            "signed chain_id={} height={} round={} kind={}",
            request.chain_id, request.height, request.round, request.kind
        );
        Ok(SignedOutcome { signature, timestamp_nanos: request.timestamp_nanos })
    }

    fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vote::SignKind;
    use crate::foundation::{ChainId, SignerError};
    use crate::infrastructure::storage::MemoryStateStore;
    use ed25519_dalek::{Signature, VerifyingKey};
    use rand::rngs::OsRng;

    fn request(height: u64, round: i32, kind: SignKind, block_id: &[u8], ts: u64) -> SignRequest {
        let mut signed_bytes = block_id.to_vec();
        signed_bytes.extend_from_slice(&ts.to_le_bytes());
        SignRequest {
            chain_id: ChainId::from("test-chain"),
            height,
            round,
            kind,
            block_id: block_id.to_vec(),
            timestamp_nanos: ts,
            signed_bytes,
        }
    }

    fn signer() -> (SingleSigner, VerifyingKey) {
        let key = SigningKey::generate(&mut OsRng);
        let verifying = key.verifying_key();
        (SingleSigner::new(key, Arc::new(MemoryStateStore::new())), verifying)
    }

    #[tokio::test]
    async fn signs_and_verifies() {
        let (signer, verifying) = signer();
        let request = request(10, 0, SignKind::Prevote, b"b1", 100);
        let outcome = signer.sign(request.clone()).await.expect("sign");
        let signature = Signature::from_slice(&outcome.signature).expect("signature");
        verifying.verify_strict(&request.signed_bytes, &signature).expect("verify");
    }

    #[tokio::test]
    async fn identical_request_is_idempotent() {
        let (signer, _) = signer();
        let request = request(10, 0, SignKind::Prevote, b"b1", 100);
        let first = signer.sign(request.clone()).await.expect("sign");
        let second = signer.sign(request).await.expect("sign");
        assert_eq!(first.signature, second.signature);
    }

    #[tokio::test]
    async fn timestamp_only_retry_returns_first_signature_and_timestamp() {
        let (signer, _) = signer();
        let first = signer.sign(request(10, 0, SignKind::Prevote, b"b1", 100)).await.expect("sign");
        let retry = signer.sign(request(10, 0, SignKind::Prevote, b"b1", 999)).await.expect("sign");
        assert_eq!(first.signature, retry.signature);
        assert_eq!(retry.timestamp_nanos, 100);
    }

    #[tokio::test]
    async fn regression_is_rejected_without_state_change() {
        let (signer, _) = signer();
        signer.sign(request(10, 0, SignKind::Precommit, b"b1", 100)).await.expect("sign");
        let err = signer.sign(request(10, 0, SignKind::Prevote, b"b1", 200)).await.expect_err("rejected");
        assert!(matches!(err, SignerError::BeyondBlock { .. }));

        // The mark is unchanged: the original precommit still replays.
        let replay = signer.sign(request(10, 0, SignKind::Precommit, b"b1", 100)).await.expect("replay");
        assert!(!replay.signature.is_empty());
    }

    #[tokio::test]
    async fn conflicting_block_id_is_rejected() {
        let (signer, _) = signer();
        signer.sign(request(10, 0, SignKind::Prevote, b"b1", 100)).await.expect("sign");
        let err = signer.sign(request(10, 0, SignKind::Prevote, b"b2", 100)).await.expect_err("rejected");
        assert!(matches!(err, SignerError::ConflictingData { .. }));
    }
}
