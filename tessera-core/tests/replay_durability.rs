//! Replay idempotence must survive a signer restart: the stored mark
//! carries the signed bytes and signature, so a rebuilt signer over the
//! same state directory answers identical and timestamp-only requests
//! with the original signature.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::sync::Arc;
use tempfile::TempDir;
use tessera_core::application::{PrivValidator, SingleSigner};
use tessera_core::domain::vote::{SignKind, SignRequest};
use tessera_core::foundation::{ChainId, SignerError};
use tessera_core::infrastructure::storage::FileStateStore;

fn request(height: u64, round: i32, kind: SignKind, block_id: &[u8], ts: u64) -> SignRequest {
    let mut signed_bytes = block_id.to_vec();
    signed_bytes.extend_from_slice(&ts.to_le_bytes());
    SignRequest {
        chain_id: ChainId::from("durable-chain"),
        height,
        round,
        kind,
        block_id: block_id.to_vec(),
        timestamp_nanos: ts,
        signed_bytes,
    }
}

#[tokio::test]
async fn replay_and_guard_survive_restart() {
    let dir = TempDir::new().expect("tempdir");
    let key = SigningKey::generate(&mut OsRng);

    let first_run = SingleSigner::new(key.clone(), Arc::new(FileStateStore::open(dir.path()).expect("store")));
    let original = first_run.sign(request(10, 0, SignKind::Precommit, b"block-a", 100)).await.expect("sign");
    drop(first_run);

    // Restart: fresh signer over the same state directory.
    let second_run = SingleSigner::new(key, Arc::new(FileStateStore::open(dir.path()).expect("store")));

    let replayed = second_run.sign(request(10, 0, SignKind::Precommit, b"block-a", 100)).await.expect("replay");
    assert_eq!(replayed.signature, original.signature);

    let ts_replayed = second_run.sign(request(10, 0, SignKind::Precommit, b"block-a", 999)).await.expect("replay");
    assert_eq!(ts_replayed.signature, original.signature);
    assert_eq!(ts_replayed.timestamp_nanos, 100);

    let err = second_run.sign(request(9, 0, SignKind::Prevote, b"block-b", 50)).await.expect_err("beyond block");
    assert!(matches!(err, SignerError::BeyondBlock { .. }));

    let err = second_run
        .sign(request(10, 0, SignKind::Precommit, b"block-other", 100))
        .await
        .expect_err("conflict");
    assert!(matches!(err, SignerError::ConflictingData { .. }));

    // Progress continues past the restored mark.
    second_run.sign(request(11, 0, SignKind::Prevote, b"block-c", 300)).await.expect("sign next height");
}
