//! End-to-end threshold signing scenarios over an in-process 2-of-3
//! cluster with real TCP between cosigners.

mod harness;

use harness::{sign_request, TestCluster, TEST_CHAIN};
use std::time::Duration;
use tessera_core::application::PrivValidator;
use tessera_core::domain::threshold;
use tessera_core::domain::vote::SignKind;
use tessera_core::foundation::{ChainId, SignerError};
use tessera_core::infrastructure::storage::SignStateStore;

const LEADER_WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn happy_path_two_of_three() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let signer = &cluster.node(leader).handles.signer;

    let request = sign_request(10, 0, SignKind::Prevote, b"block-a", 100);
    let outcome = signer.sign(request.clone()).await.expect("sign");
    threshold::verify(&cluster.group_pubkey, &request.signed_bytes, &outcome.signature).expect("verify");

    // The leader's high-water mark advanced and carries the signature.
    let hwm = cluster
        .node(leader)
        .store
        .load(&ChainId::from(TEST_CHAIN))
        .expect("load")
        .expect("hwm");
    assert_eq!((hwm.height, hwm.round, hwm.step), (10, 0, SignKind::Prevote.step()));
    assert_eq!(hwm.signature, outcome.signature);

    // Byte-identical replay.
    let again = signer.sign(request).await.expect("replay");
    assert_eq!(again.signature, outcome.signature);
}

#[tokio::test]
async fn timestamp_only_retry_replays_first_signature() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let signer = &cluster.node(leader).handles.signer;

    let first = signer.sign(sign_request(7, 0, SignKind::Precommit, b"block-a", 100)).await.expect("sign");
    let retry = signer.sign(sign_request(7, 0, SignKind::Precommit, b"block-a", 999)).await.expect("retry");
    assert_eq!(first.signature, retry.signature);
    assert_eq!(retry.timestamp_nanos, 100);
}

#[tokio::test]
async fn beyond_block_is_rejected_without_state_change() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let signer = &cluster.node(leader).handles.signer;

    signer.sign(sign_request(10, 0, SignKind::Precommit, b"block-a", 100)).await.expect("sign");
    let err = signer.sign(sign_request(10, 0, SignKind::Prevote, b"block-a", 200)).await.expect_err("must reject");
    assert!(matches!(err, SignerError::BeyondBlock { .. }), "unexpected: {}", err);
    assert!(err.to_string().contains("beyond block"));

    let hwm = cluster
        .node(leader)
        .store
        .load(&ChainId::from(TEST_CHAIN))
        .expect("load")
        .expect("hwm");
    assert_eq!(hwm.step, SignKind::Precommit.step());
}

#[tokio::test]
async fn conflicting_block_id_is_rejected() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let signer = &cluster.node(leader).handles.signer;

    signer.sign(sign_request(10, 0, SignKind::Prevote, b"block-a", 100)).await.expect("sign");
    let err = signer.sign(sign_request(10, 0, SignKind::Prevote, b"block-b", 100)).await.expect_err("must reject");
    assert!(matches!(err, SignerError::ConflictingData { .. }), "unexpected: {}", err);
}

#[tokio::test]
async fn follower_refuses_to_sign() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let follower = cluster.nodes.iter().find(|node| node.shard_id != leader).expect("follower");

    let err = follower.handles.signer.sign(sign_request(5, 0, SignKind::Prevote, b"block-a", 1)).await.expect_err("not leader");
    assert!(matches!(err, SignerError::NotLeader { .. }));
}

#[tokio::test]
async fn one_downed_cosigner_still_signs() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let downed = cluster.nodes.iter().find(|node| node.shard_id != leader).expect("victim");
    downed.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let request = sign_request(11, 0, SignKind::Prevote, b"block-b", 100);
    let outcome = cluster.node(leader).handles.signer.sign(request.clone()).await.expect("sign");
    threshold::verify(&cluster.group_pubkey, &request.signed_bytes, &outcome.signature).expect("verify");
}

#[tokio::test]
async fn two_downed_cosigners_fail_without_state_change() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    for node in &cluster.nodes {
        if node.shard_id != leader {
            node.stop();
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = cluster
        .node(leader)
        .handles
        .signer
        .sign(sign_request(12, 0, SignKind::Prevote, b"block-c", 100))
        .await
        .expect_err("quorum unavailable");
    assert!(
        matches!(err, SignerError::QuorumTimeout { .. } | SignerError::SessionTimeout { .. }),
        "unexpected: {}",
        err
    );

    // No durable mark was created for the failed request.
    let hwm = cluster.node(leader).store.load(&ChainId::from(TEST_CHAIN)).expect("load");
    assert!(hwm.is_none());
}

#[tokio::test]
async fn leadership_transfer_moves_signing() {
    let cluster = TestCluster::spawn(2, 3).await;
    let first_leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let target = cluster.nodes.iter().map(|n| n.shard_id).find(|id| *id != first_leader).expect("target");

    // Admin op lands on the current leader, which steps down and hands off.
    let admin_client = &cluster.node(target).handles.client;
    let response = admin_client
        .call(
            first_leader,
            tessera_service::cluster::PeerRequest::TransferLeadership { target },
        )
        .await
        .expect("transfer rpc");
    assert!(
        matches!(response, tessera_service::cluster::PeerResponse::TransferAccepted),
        "unexpected transfer response: {:?}",
        response
    );

    // Within the election timeout, every cosigner reports the new leader.
    let deadline = tokio::time::Instant::now() + LEADER_WAIT;
    loop {
        let all_agree = cluster.nodes.iter().all(|node| node.handles.raft.current_leader().0 == Some(target));
        if all_agree {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "transfer did not complete");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let request = sign_request(20, 0, SignKind::Prevote, b"block-t", 100);
    let outcome = cluster.node(target).handles.signer.sign(request.clone()).await.expect("sign after transfer");
    threshold::verify(&cluster.group_pubkey, &request.signed_bytes, &outcome.signature).expect("verify");
}

#[tokio::test]
async fn marks_replicate_to_followers() {
    let cluster = TestCluster::spawn(2, 3).await;
    let leader = cluster.wait_for_leader(LEADER_WAIT).await;
    let request = sign_request(30, 0, SignKind::Precommit, b"block-r", 100);
    let outcome = cluster.node(leader).handles.signer.sign(request).await.expect("sign");

    // Followers converge on the committed mark with the full signature.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    'outer: loop {
        let mut all_match = true;
        for node in &cluster.nodes {
            match node.store.load(&ChainId::from(TEST_CHAIN)).expect("load") {
                Some(hwm) if hwm.signature == outcome.signature => {}
                _ => {
                    all_match = false;
                }
            }
        }
        if all_match {
            break 'outer;
        }
        assert!(tokio::time::Instant::now() < deadline, "marks did not replicate");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
