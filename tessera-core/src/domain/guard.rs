use crate::domain::vote::{SignRequest, SignState};
use crate::foundation::{Result, SignerError};

/// Outcome of checking a sign request against the stored high-water mark.
#[derive(Clone, Debug, PartialEq)]
pub enum GuardDecision {
    /// Strictly above the mark: proceed to sign, then commit the new mark.
    Sign,
    /// Byte-identical to the mark: return the stored signature unchanged.
    Replay { signature: Vec<u8> },
    /// Identical except for the timestamp: return the stored signature with
    /// the stored timestamp substituted into the response.
    ReplayWithTimestamp { signature: Vec<u8>, timestamp_nanos: u64 },
}

/// Classify a request against the high-water mark.
///
/// Called before any cryptographic work, and again under the leader's
/// commit lock to close the window between check and commit. The mark is
/// never advanced on a rejection.
///
/// A mark holding the same (height, round, step) and bytes but no
/// signature means a prior session advanced the mark and then died before
/// the replicated commit landed. Re-signing the same bytes with a fresh
/// nonce is safe; returning `Sign` here is what makes that crash window
/// recoverable.
pub fn check_sign_request(request: &SignRequest, hwm: Option<&SignState>) -> Result<GuardDecision> {
    let Some(hwm) = hwm else {
        return Ok(GuardDecision::Sign);
    };

    let req_hrs = request.hrs();
    let hwm_hrs = hwm.hrs();

    if req_hrs > hwm_hrs {
        return Ok(GuardDecision::Sign);
    }

    if req_hrs < hwm_hrs {
        return Err(SignerError::BeyondBlock {
            chain_id: request.chain_id.to_string(),
            details: format!(
                "requested {}/{}/{} is beyond block: already signed {}/{}/{}",
                request.height, request.round, request.kind, hwm.height, hwm.round, hwm.step,
            ),
        });
    }

    // Same (height, round, step).
    if request.signed_bytes == hwm.signed_bytes {
        if hwm.has_signature() {
            return Ok(GuardDecision::Replay { signature: hwm.signature.clone() });
        }
        return Ok(GuardDecision::Sign);
    }

    if request.block_id == hwm.block_id {
        // Only the timestamp differs inside the canonical bytes.
        if hwm.has_signature() {
            return Ok(GuardDecision::ReplayWithTimestamp {
                signature: hwm.signature.clone(),
                timestamp_nanos: hwm.timestamp_nanos,
            });
        }
        return Ok(GuardDecision::Sign);
    }

    Err(SignerError::ConflictingData {
        height: request.height,
        round: request.round,
        step: request.kind.step(),
        details: format!(
            "already signed block id {} at this height/round/step, refusing block id {}",
            hex::encode(&hwm.block_id),
            hex::encode(&request.block_id),
        ),
    })
}
