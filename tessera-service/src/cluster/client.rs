//! Outgoing cosigner RPC: one framed TCP exchange per call, under a
//! per-call deadline. Responses are accepted only when the envelope
//! signature matches the dialed peer's registered identity.

use crate::cluster::messages::{
    decode_envelope, encode_envelope, seal_envelope, PeerPayload, PeerRequest, PeerResponse, MAX_PEER_MESSAGE_SIZE,
};
use crate::cluster::registry::Registry;
use ed25519_dalek::SigningKey;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tessera_core::foundation::{Result, ShardId, SignerError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Last-success bookkeeping fed by calls and the background health ping.
#[derive(Default)]
pub struct PeerHealth {
    last_ok: Mutex<HashMap<ShardId, Instant>>,
}

impl PeerHealth {
    pub fn mark_ok(&self, shard_id: ShardId) {
        if let Ok(mut last_ok) = self.last_ok.lock() {
            last_ok.insert(shard_id, Instant::now());
        }
    }

    pub fn reachable_within(&self, shard_id: ShardId, window: Duration) -> bool {
        self.last_ok
            .lock()
            .ok()
            .and_then(|last_ok| last_ok.get(&shard_id).map(|at| at.elapsed() <= window))
            .unwrap_or(false)
    }
}

pub struct PeerClient {
    registry: Arc<Registry>,
    identity: Arc<SigningKey>,
    deadline: Duration,
    health: PeerHealth,
}

impl PeerClient {
    pub fn new(registry: Arc<Registry>, identity: Arc<SigningKey>, deadline: Duration) -> Self {
        Self { registry, identity, deadline, health: PeerHealth::default() }
    }

    pub fn health(&self) -> &PeerHealth {
        &self.health
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// One request/response exchange with `target`, bounded by the
    /// configured deadline. Any failure marks the peer unresponsive for
    /// the caller's current session.
    pub async fn call(&self, target: ShardId, request: PeerRequest) -> Result<PeerResponse> {
        let result = timeout(self.deadline, self.call_inner(target, request)).await;
        match result {
            Ok(Ok(response)) => {
                self.health.mark_ok(target);
                Ok(response)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SignerError::PeerUnreachable {
                shard_id: target,
                details: format!("deadline {}ms exceeded", self.deadline.as_millis()),
            }),
        }
    }

    async fn call_inner(&self, target: ShardId, request: PeerRequest) -> Result<PeerResponse> {
        let peer = self
            .registry
            .get(target)
            .ok_or(SignerError::InvalidPeerIdentity { shard_id: target })?;

        let mut stream = TcpStream::connect(&peer.addr).await.map_err(|err| SignerError::PeerUnreachable {
            shard_id: target,
            details: format!("dial {}: {}", peer.addr, err),
        })?;

        let envelope = seal_envelope(&self.identity, self.registry.own_shard(), PeerPayload::Request(request))?;
        write_frame(&mut stream, &encode_envelope(&envelope)?).await?;

        let frame = read_frame(&mut stream).await?;
        let response = decode_envelope(&frame)?;
        if response.sender != target {
            return Err(SignerError::InvalidPeerIdentity { shard_id: response.sender });
        }
        self.registry.verify(response.sender, &response.payload_hash, &response.signature)?;
        let computed = crate::cluster::messages::payload_hash(&response.payload)?;
        if computed != response.payload_hash {
            return Err(SignerError::InvalidPeerIdentity { shard_id: response.sender });
        }

        match response.payload {
            PeerPayload::Response(response) => {
                debug!("peer call ok target={}", target);
                Ok(response)
            }
            PeerPayload::Request(_) => {
                Err(SignerError::DecodeError("peer answered a call with a request".to_string()))
            }
        }
    }
}

pub(crate) async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > MAX_PEER_MESSAGE_SIZE {
        return Err(SignerError::MessageTooLarge { size: len, max: MAX_PEER_MESSAGE_SIZE });
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(frame)
}

pub(crate) async fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<()> {
    if frame.len() > MAX_PEER_MESSAGE_SIZE {
        return Err(SignerError::MessageTooLarge { size: frame.len(), max: MAX_PEER_MESSAGE_SIZE });
    }
    stream.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}
