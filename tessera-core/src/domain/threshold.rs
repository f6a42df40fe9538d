//! Threshold Ed25519 signature math.
//!
//! The signing equation is standard Ed25519: `s = k + H(R ‖ A ‖ m)·a`,
//! with both `k` and `a` Shamir-shared. Each recruit holds a share of the
//! combined session nonce (`k_j`) and its long-term key shard (`x_j`) and
//! produces `s_j = k_j + c·x_j`; interpolating the partials at 0 yields
//! `s`. The result verifies as an ordinary Ed25519 signature against the
//! group public key.

use crate::domain::shamir::{self, SecretShare};
use crate::foundation::{Result, ShardId, SignerError};
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{Signature, VerifyingKey};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const SIGNATURE_LEN: usize = 64;

/// A cosigner's long-term share of the validator private scalar.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyShard {
    pub shard_id: ShardId,
    pub share: Scalar,
    #[zeroize(skip)]
    pub group_pubkey: [u8; 32],
}

/// Dealer ceremony: draw a group secret and split it K-of-N.
///
/// Returns the shards and the group public key. The group secret itself
/// exists only inside this function.
pub fn deal_shards<R: RngCore + CryptoRng>(threshold: u8, total: u8, rng: &mut R) -> Result<Vec<KeyShard>> {
    let secret = Zeroizing::new(shamir::random_scalar(rng));
    let group_pubkey = (ED25519_BASEPOINT_POINT * *secret).compress().to_bytes();
    let shares: Vec<SecretShare> = shamir::split(&secret, threshold, total, rng)?;
    Ok(shares.iter().map(|share| KeyShard { shard_id: share.shard_id, share: share.value, group_pubkey }).collect())
}

/// The Ed25519 challenge scalar `H(R ‖ A ‖ m) mod L`.
pub fn challenge(nonce_point: &[u8; 32], group_pubkey: &[u8; 32], message: &[u8]) -> Scalar {
    let digest = Sha512::new().chain_update(nonce_point).chain_update(group_pubkey).chain_update(message).finalize();
    Scalar::from_bytes_mod_order_wide(&digest.into())
}

/// This cosigner's contribution: `s_j = k_j + c·x_j`.
pub fn partial_signature(nonce_share: &Scalar, challenge: &Scalar, key_shard: &KeyShard) -> Scalar {
    nonce_share + challenge * key_shard.share
}

/// Interpolate the partial signatures at 0 and assemble `(R, s)`.
pub fn aggregate(nonce_point: &EdwardsPoint, partials: &[(ShardId, Scalar)], threshold: u8) -> Result<[u8; SIGNATURE_LEN]> {
    if partials.len() < usize::from(threshold) {
        return Err(SignerError::ThresholdNotMet { required: usize::from(threshold), received: partials.len() });
    }
    let s = shamir::interpolate(partials)?;
    let mut signature = [0u8; SIGNATURE_LEN];
    signature[..32].copy_from_slice(&nonce_point.compress().to_bytes());
    signature[32..].copy_from_slice(&s.to_bytes());
    Ok(signature)
}

/// Strict Ed25519 verification against the group public key.
pub fn verify(group_pubkey: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    let key = VerifyingKey::from_bytes(group_pubkey)
        .map_err(|err| SignerError::InvalidPublicKey(err.to_string()))?;
    let signature = Signature::from_slice(signature).map_err(|_| SignerError::SignatureInvalid)?;
    key.verify_strict(message, &signature).map_err(|_| SignerError::SignatureInvalid)
}
