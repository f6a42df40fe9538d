//! Sentry-side behavior: the connector dials, serves requests over the
//! encrypted channel, and reconnects after the sentry drops the link.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::application::{PrivvalService, SingleSigner};
use tessera_core::infrastructure::privval::proto::{
    privval_message, BlockId, PartSetHeader, PrivvalMessage, SignVoteRequest, SignedVoteResponse, Vote,
    SIGNED_MSG_TYPE_PREVOTE,
};
use tessera_core::infrastructure::privval::{decode_message, encode_message, timestamp_from_nanos};
use tessera_core::infrastructure::storage::MemoryStateStore;
use tessera_core::infrastructure::transport::{Role, SecretConnection};
use tessera_service::connector::SentryConnector;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

fn vote_request(height: i64, ts: u64) -> PrivvalMessage {
    PrivvalMessage {
        sum: Some(privval_message::Sum::SignVoteRequest(SignVoteRequest {
            chain_id: "test-chain-1".to_string(),
            vote: Some(Vote {
                r#type: SIGNED_MSG_TYPE_PREVOTE,
                height,
                round: 0,
                block_id: Some(BlockId {
                    hash: vec![0xAA; 32],
                    part_set_header: Some(PartSetHeader { total: 1, hash: vec![0xBB; 32] }),
                }),
                timestamp: Some(timestamp_from_nanos(ts)),
                validator_address: vec![0xCC; 20],
                validator_index: 0,
                signature: Vec::new(),
            }),
        })),
    }
}

async fn accept_signer(listener: &TcpListener, identity: &SigningKey) -> SecretConnection<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept");
    SecretConnection::handshake(stream, identity, Role::Listener).await.expect("handshake")
}

async fn exchange(conn: &mut SecretConnection<TcpStream>, request: PrivvalMessage) -> SignedVoteResponse {
    conn.send_frame(&encode_message(&request).expect("encode")).await.expect("send");
    let frame = conn.recv_frame().await.expect("recv");
    match decode_message(&frame).expect("decode").sum {
        Some(privval_message::Sum::SignedVoteResponse(inner)) => inner,
        other => panic!("expected signed vote response, got {:?}", other),
    }
}

#[tokio::test]
async fn connector_serves_and_reconnects_after_cut() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let sentry_addr = listener.local_addr().expect("addr").to_string();
    let sentry_identity = SigningKey::generate(&mut OsRng);

    let validator_key = SigningKey::generate(&mut OsRng);
    let validator_pubkey = validator_key.verifying_key();
    let service = Arc::new(PrivvalService::new(Arc::new(SingleSigner::new(
        validator_key,
        Arc::new(MemoryStateStore::new()),
    ))));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connector_task = SentryConnector::new(sentry_addr, service, shutdown_rx).spawn();

    // First connection: one signed vote.
    let mut conn = accept_signer(&listener, &sentry_identity).await;
    let response = exchange(&mut conn, vote_request(10, 100)).await;
    assert!(response.error.is_none());
    let vote = response.vote.expect("vote");
    assert_eq!(vote.signature.len(), 64);
    validator_pubkey
        .verify_strict(
            &tessera_core::infrastructure::privval::canonical_vote_bytes(
                &tessera_core::foundation::ChainId::from("test-chain-1"),
                &{
                    let mut unsigned = vote.clone();
                    unsigned.signature = Vec::new();
                    unsigned
                },
            ),
            &ed25519_dalek::Signature::from_slice(&vote.signature).expect("signature"),
        )
        .expect("verify");

    // Cut the connection mid-session; the connector must redial within
    // its retry sleep and serve the next request.
    drop(conn);
    let mut conn = accept_signer(&listener, &sentry_identity).await;
    let response = exchange(&mut conn, vote_request(11, 200)).await;
    assert!(response.error.is_none());

    let _ = shutdown_tx.send(true);
    drop(conn);
    let _ = tokio::time::timeout(Duration::from_secs(5), connector_task).await;
}
