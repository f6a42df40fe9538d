use crate::foundation::{hex_bytes, ChainId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of consensus message is being signed.
///
/// Kinds carry fixed step numbers giving a total order within a
/// (height, round): a proposal precedes the prevote, which precedes the
/// precommit. The high-water mark compares `(height, round, step)`
/// lexicographically.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignKind {
    Proposal,
    Prevote,
    Precommit,
}

impl SignKind {
    pub const fn step(self) -> u8 {
        match self {
            SignKind::Proposal => 1,
            SignKind::Prevote => 2,
            SignKind::Precommit => 3,
        }
    }

    pub fn from_step(step: u8) -> Option<Self> {
        match step {
            1 => Some(SignKind::Proposal),
            2 => Some(SignKind::Prevote),
            3 => Some(SignKind::Precommit),
            _ => None,
        }
    }
}

impl fmt::Display for SignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignKind::Proposal => write!(f, "proposal"),
            SignKind::Prevote => write!(f, "prevote"),
            SignKind::Precommit => write!(f, "precommit"),
        }
    }
}

/// A fully resolved request to sign one consensus message.
///
/// `signed_bytes` is the canonical encoding the sentry will verify the
/// signature against; `block_id` and `timestamp_nanos` are carried
/// structurally so the guard can apply the timestamp-only replay rule
/// without re-parsing the canonical bytes.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SignRequest {
    pub chain_id: ChainId,
    pub height: u64,
    pub round: i32,
    pub kind: SignKind,
    #[serde(with = "hex_bytes")]
    pub block_id: Vec<u8>,
    pub timestamp_nanos: u64,
    #[serde(with = "hex_bytes")]
    pub signed_bytes: Vec<u8>,
}

impl SignRequest {
    pub fn hrs(&self) -> (u64, i32, u8) {
        (self.height, self.round, self.kind.step())
    }

    /// The session a threshold signing run for this request belongs to.
    pub fn session_key(&self) -> SessionKey {
        SessionKey { chain_id: self.chain_id.clone(), height: self.height, round: self.round, step: self.kind.step() }
    }
}

/// Identity of one threshold signing session.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct SessionKey {
    pub chain_id: ChainId,
    pub height: u64,
    pub round: i32,
    pub step: u8,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.chain_id, self.height, self.round, self.step)
    }
}

/// Durable high-water mark for one chain: the most recently signed
/// (height, round, step) together with the bytes that were signed and the
/// signature that was produced, so exact replays can be answered without
/// signing again.
///
/// `signature` is empty while a threshold session is in flight (followers
/// advance their mark before producing a partial signature); it is filled
/// in when the replicated commit applies.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SignState {
    pub height: u64,
    pub round: i32,
    pub step: u8,
    #[serde(with = "hex_bytes")]
    pub block_id: Vec<u8>,
    pub timestamp_nanos: u64,
    #[serde(with = "hex_bytes")]
    pub signed_bytes: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignState {
    pub fn hrs(&self) -> (u64, i32, u8) {
        (self.height, self.round, self.step)
    }

    pub fn has_signature(&self) -> bool {
        !self.signature.is_empty()
    }

    /// The mark a request advances to, before any signature exists.
    pub fn advancing_to(request: &SignRequest) -> Self {
        Self {
            height: request.height,
            round: request.round,
            step: request.kind.step(),
            block_id: request.block_id.clone(),
            timestamp_nanos: request.timestamp_nanos,
            signed_bytes: request.signed_bytes.clone(),
            signature: Vec::new(),
        }
    }

    /// The committed mark: the advancing mark plus the produced signature.
    pub fn committed(request: &SignRequest, signature: Vec<u8>) -> Self {
        let mut state = Self::advancing_to(request);
        state.signature = signature;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_order_is_proposal_prevote_precommit() {
        assert!(SignKind::Proposal.step() < SignKind::Prevote.step());
        assert!(SignKind::Prevote.step() < SignKind::Precommit.step());
    }

    #[test]
    fn hrs_tuples_order_lexicographically() {
        let low = (10u64, 0i32, SignKind::Precommit.step());
        let high = (11u64, 0i32, SignKind::Proposal.step());
        assert!(low < high);

        let same_height = (10u64, 1i32, SignKind::Proposal.step());
        assert!(low < same_height);
    }

    #[test]
    fn step_round_trips() {
        for kind in [SignKind::Proposal, SignKind::Prevote, SignKind::Precommit] {
            assert_eq!(SignKind::from_step(kind.step()), Some(kind));
        }
        assert_eq!(SignKind::from_step(0), None);
        assert_eq!(SignKind::from_step(4), None);
    }
}
