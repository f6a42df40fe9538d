//! Cosigner-to-cosigner RPC: signed envelopes over framed TCP.
//!
//! Every message travels as a version-prefixed bincode `PeerEnvelope`
//! whose payload hash is signed with the sender's cluster identity key
//! and checked against the configured registry on receipt.

use bincode::Options;
use serde::{Deserialize, Serialize};
use tessera_core::domain::nonce::{EncryptedNonceShard, NonceOffer};
use tessera_core::domain::{SessionKey, SignRequest, SignState};
use tessera_core::foundation::{Hash32, Result, ShardId, SignerError};

pub const WIRE_PROTOCOL_VERSION: u16 = 1;

/// Upper bound on one cluster frame.
pub const MAX_PEER_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PeerEnvelope {
    pub sender: ShardId,
    pub payload_hash: Hash32,
    pub signature: Vec<u8>,
    pub payload: PeerPayload,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum PeerPayload {
    Request(PeerRequest),
    Response(PeerResponse),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum PeerRequest {
    Ping,
    GetLeader,
    TransferLeadership { target: ShardId },
    GetNonces { session: SessionKey },
    SetNoncesAndSign(Box<SetNoncesAndSign>),
    RequestVote(RequestVote),
    AppendEntries(AppendEntries),
}

/// A nonce commitment `R_i = k_i·G` published by `origin`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct NonceCommitment {
    pub origin: ShardId,
    pub commitment: [u8; 32],
}

/// A nonce shard addressed to the receiving cosigner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AddressedShard {
    pub origin: ShardId,
    pub ciphertext: Vec<u8>,
}

impl AddressedShard {
    pub fn from_offer(offer: &NonceOffer, recipient: ShardId) -> Option<Self> {
        offer
            .shards
            .iter()
            .find(|shard| shard.recipient == recipient)
            .map(|shard| Self { origin: offer.origin, ciphertext: shard.ciphertext.clone() })
    }

    pub fn as_encrypted_shard(&self, recipient: ShardId) -> EncryptedNonceShard {
        EncryptedNonceShard { recipient, ciphertext: self.ciphertext.clone() }
    }
}

/// The leader's step-5 instruction: the recruit set, everyone's
/// commitments, the shards destined for this cosigner, and the request
/// whose guard the recipient must re-run before answering.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SetNoncesAndSign {
    pub session: SessionKey,
    pub recruits: Vec<ShardId>,
    pub commitments: Vec<NonceCommitment>,
    pub shards: Vec<AddressedShard>,
    pub request: SignRequest,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RequestVote {
    pub term: u64,
    pub candidate: ShardId,
    pub last_log_index: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub chain_id: tessera_core::foundation::ChainId,
    pub state: SignState,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppendEntries {
    pub term: u64,
    pub leader: ShardId,
    pub entries: Vec<LogEntry>,
    pub commit_index: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum PeerErrorKind {
    NotLeader,
    BeyondBlock,
    Conflict,
    SessionRefused,
    Storage,
    Other,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum PeerResponse {
    Pong { shard_id: ShardId },
    Leader { leader: Option<ShardId>, term: u64 },
    TransferAccepted,
    Nonces(NonceOffer),
    Partial { shard_id: ShardId, partial: [u8; 32] },
    Vote { term: u64, granted: bool },
    AppendAck { term: u64, success: bool },
    Error { kind: PeerErrorKind, message: String },
}

impl PeerResponse {
    pub fn error(kind: PeerErrorKind, message: impl Into<String>) -> Self {
        PeerResponse::Error { kind, message: message.into() }
    }

    pub fn from_error(err: &SignerError) -> Self {
        let kind = match err {
            SignerError::NotLeader { .. } => PeerErrorKind::NotLeader,
            SignerError::BeyondBlock { .. } => PeerErrorKind::BeyondBlock,
            SignerError::ConflictingData { .. } => PeerErrorKind::Conflict,
            SignerError::SessionInProgress | SignerError::NonceAlreadyUsed => PeerErrorKind::SessionRefused,
            SignerError::StorageError { .. } => PeerErrorKind::Storage,
            _ => PeerErrorKind::Other,
        };
        PeerResponse::Error { kind, message: err.to_string() }
    }
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding().with_limit(MAX_PEER_MESSAGE_SIZE as u64)
}

pub fn payload_hash(payload: &PeerPayload) -> Result<Hash32> {
    let bytes = bincode_options().serialize(payload)?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

pub fn encode_envelope(envelope: &PeerEnvelope) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&WIRE_PROTOCOL_VERSION.to_le_bytes());
    out.extend_from_slice(&bincode_options().serialize(envelope)?);
    Ok(out)
}

pub fn decode_envelope(bytes: &[u8]) -> Result<PeerEnvelope> {
    if bytes.len() < 2 {
        return Err(SignerError::DecodeError("cluster message too short".to_string()));
    }
    let version = u16::from_le_bytes([bytes[0], bytes[1]]);
    if version != WIRE_PROTOCOL_VERSION {
        return Err(SignerError::DecodeError(format!(
            "wire protocol version mismatch: expected {}, got {}",
            WIRE_PROTOCOL_VERSION, version
        )));
    }
    Ok(bincode_options().deserialize(&bytes[2..])?)
}

/// Build and sign an envelope with this cosigner's identity key.
pub fn seal_envelope(identity: &ed25519_dalek::SigningKey, sender: ShardId, payload: PeerPayload) -> Result<PeerEnvelope> {
    use ed25519_dalek::Signer;
    let payload_hash = payload_hash(&payload)?;
    let signature = identity.sign(&payload_hash).to_bytes().to_vec();
    Ok(PeerEnvelope { sender, payload_hash, signature, payload })
}
