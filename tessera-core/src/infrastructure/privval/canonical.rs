//! Canonical sign-bytes construction and the mapping between wire votes
//! and domain sign requests.

use super::proto::{
    BlockId, CanonicalBlockId, CanonicalPartSetHeader, CanonicalProposal, CanonicalVote, Proposal, Timestamp, Vote,
    SIGNED_MSG_TYPE_PRECOMMIT, SIGNED_MSG_TYPE_PREVOTE, SIGNED_MSG_TYPE_PROPOSAL,
};
use crate::domain::vote::{SignKind, SignRequest};
use crate::foundation::util::{join_timestamp_nanos, split_timestamp_nanos};
use crate::foundation::{ChainId, Result, SignerError};
use prost::Message;

pub fn sign_kind_from_wire(msg_type: i32) -> Result<SignKind> {
    match msg_type {
        SIGNED_MSG_TYPE_PREVOTE => Ok(SignKind::Prevote),
        SIGNED_MSG_TYPE_PRECOMMIT => Ok(SignKind::Precommit),
        SIGNED_MSG_TYPE_PROPOSAL => Ok(SignKind::Proposal),
        other => Err(SignerError::DecodeError(format!("unknown signed message type {}", other))),
    }
}

pub fn sign_kind_to_wire(kind: SignKind) -> i32 {
    match kind {
        SignKind::Prevote => SIGNED_MSG_TYPE_PREVOTE,
        SignKind::Precommit => SIGNED_MSG_TYPE_PRECOMMIT,
        SignKind::Proposal => SIGNED_MSG_TYPE_PROPOSAL,
    }
}

fn canonical_block_id(block_id: &Option<BlockId>) -> Option<CanonicalBlockId> {
    let block_id = block_id.as_ref()?;
    if block_id.hash.is_empty() && block_id.part_set_header.is_none() {
        // Nil votes carry no canonical block id at all.
        return None;
    }
    Some(CanonicalBlockId {
        hash: block_id.hash.clone(),
        part_set_header: block_id
            .part_set_header
            .as_ref()
            .map(|psh| CanonicalPartSetHeader { total: psh.total, hash: psh.hash.clone() }),
    })
}

/// The bytes comparable across requests to decide block identity; the
/// timestamp is deliberately excluded.
fn block_id_bytes(block_id: &Option<CanonicalBlockId>) -> Vec<u8> {
    block_id.as_ref().map(|id| id.encode_to_vec()).unwrap_or_default()
}

fn timestamp_nanos(timestamp: &Option<Timestamp>) -> u64 {
    timestamp.as_ref().map(|ts| join_timestamp_nanos(ts.seconds, ts.nanos)).unwrap_or_default()
}

pub fn timestamp_from_nanos(timestamp_nanos: u64) -> Timestamp {
    let (seconds, nanos) = split_timestamp_nanos(timestamp_nanos);
    Timestamp { seconds, nanos }
}

/// Length-delimited canonical vote encoding: the exact bytes a vote
/// signature commits to.
pub fn canonical_vote_bytes(chain_id: &ChainId, vote: &Vote) -> Vec<u8> {
    CanonicalVote {
        r#type: vote.r#type,
        height: vote.height,
        round: i64::from(vote.round),
        block_id: canonical_block_id(&vote.block_id),
        timestamp: vote.timestamp.clone(),
        chain_id: chain_id.to_string(),
    }
    .encode_length_delimited_to_vec()
}

pub fn canonical_proposal_bytes(chain_id: &ChainId, proposal: &Proposal) -> Vec<u8> {
    CanonicalProposal {
        r#type: proposal.r#type,
        height: proposal.height,
        round: i64::from(proposal.round),
        pol_round: i64::from(proposal.pol_round),
        block_id: canonical_block_id(&proposal.block_id),
        timestamp: proposal.timestamp.clone(),
        chain_id: chain_id.to_string(),
    }
    .encode_length_delimited_to_vec()
}

pub fn sign_request_from_vote(chain_id: &ChainId, vote: &Vote) -> Result<SignRequest> {
    let kind = sign_kind_from_wire(vote.r#type)?;
    if kind == SignKind::Proposal {
        return Err(SignerError::DecodeError("proposal message type inside a vote request".to_string()));
    }
    if vote.height < 0 {
        return Err(SignerError::DecodeError(format!("negative vote height {}", vote.height)));
    }
    Ok(SignRequest {
        chain_id: chain_id.clone(),
        height: vote.height as u64,
        round: vote.round,
        kind,
        block_id: block_id_bytes(&canonical_block_id(&vote.block_id)),
        timestamp_nanos: timestamp_nanos(&vote.timestamp),
        signed_bytes: canonical_vote_bytes(chain_id, vote),
    })
}

pub fn sign_request_from_proposal(chain_id: &ChainId, proposal: &Proposal) -> Result<SignRequest> {
    let kind = sign_kind_from_wire(proposal.r#type)?;
    if kind != SignKind::Proposal {
        return Err(SignerError::DecodeError(format!("vote message type {} inside a proposal request", proposal.r#type)));
    }
    if proposal.height < 0 {
        return Err(SignerError::DecodeError(format!("negative proposal height {}", proposal.height)));
    }
    Ok(SignRequest {
        chain_id: chain_id.clone(),
        height: proposal.height as u64,
        round: proposal.round,
        kind,
        block_id: block_id_bytes(&canonical_block_id(&proposal.block_id)),
        timestamp_nanos: timestamp_nanos(&proposal.timestamp),
        signed_bytes: canonical_proposal_bytes(chain_id, proposal),
    })
}
