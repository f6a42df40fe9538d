//! Per-session ephemeral nonce generation and distribution.
//!
//! Each participating cosigner draws a uniform nonce scalar, Shamir-shares
//! it K-of-N, and encrypts each shard to its recipient's ECIES key. The
//! commitment `R_i = k_i·G` travels in the clear alongside the encrypted
//! shards; the session nonce point is `R = Σ R_i` over the recruits.
//!
//! Nonce reuse across two distinct messages leaks the private key, so the
//! raw scalar never leaves this module unencrypted and all intermediate
//! material is zeroed as soon as the offer is assembled.

use crate::domain::ecies::{self, EciesKeypair, EciesPublicKey};
use crate::domain::shamir;
use crate::foundation::{Result, ShardId, SignerError};
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EncryptedNonceShard {
    pub recipient: ShardId,
    pub ciphertext: Vec<u8>,
}

/// One cosigner's contribution to a signing session: the public commitment
/// to its nonce and one encrypted Shamir shard per cosigner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NonceOffer {
    pub origin: ShardId,
    pub commitment: [u8; 32],
    pub shards: Vec<EncryptedNonceShard>,
}

/// Draw a fresh nonce, shard it, and encrypt every shard to its recipient.
///
/// `recipients` maps shard id to ECIES public key and must cover all
/// `total` shards (the generator encrypts a shard to itself as well, so a
/// cosigner never needs to remember its own plaintext nonce material).
pub fn generate_offer<R: RngCore + CryptoRng>(
    origin: ShardId,
    threshold: u8,
    total: u8,
    recipients: &[(ShardId, EciesPublicKey)],
    rng: &mut R,
) -> Result<NonceOffer> {
    if recipients.len() != usize::from(total) {
        return Err(SignerError::ConfigError(format!(
            "nonce recipients {} do not cover all {} shards",
            recipients.len(),
            total
        )));
    }

    let nonce = Zeroizing::new(shamir::random_scalar(rng));
    let commitment = (ED25519_BASEPOINT_POINT * *nonce).compress().to_bytes();

    let shares = shamir::split(&nonce, threshold, total, rng)?;
    let mut shards = Vec::with_capacity(shares.len());
    for share in &shares {
        let recipient_key = recipients
            .iter()
            .find(|(id, _)| *id == share.shard_id)
            .map(|(_, key)| key)
            .ok_or(SignerError::ShardMismatch { expected: share.shard_id, actual: 0 })?;
        let plaintext = Zeroizing::new(share.value.to_bytes());
        shards.push(EncryptedNonceShard { recipient: share.shard_id, ciphertext: ecies::seal(recipient_key, plaintext.as_ref())? });
    }

    Ok(NonceOffer { origin, commitment, shards })
}

/// Decrypt a shard destined for this cosigner.
pub fn decrypt_shard(keypair: &EciesKeypair, shard: &EncryptedNonceShard) -> Result<Scalar> {
    let plaintext = ecies::open(keypair, &shard.ciphertext)?;
    let bytes: [u8; 32] =
        plaintext.as_slice().try_into().map_err(|_| SignerError::crypto("nonce shard", "plaintext is not 32 bytes"))?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
        .ok_or_else(|| SignerError::crypto("nonce shard", "non-canonical scalar"))
}

/// Combine the shards this cosigner received from every recruit.
///
/// All dealt polynomials were evaluated at this cosigner's shard id, so
/// the combined-nonce share is their plain sum; the Lagrange weights enter
/// once, when partial signatures are interpolated at 0.
pub fn combine_shards(shards: &[Scalar]) -> Scalar {
    shards.iter().sum()
}

/// The session nonce point `R`, from the recruits' public commitments.
pub fn aggregate_commitments(commitments: &[[u8; 32]]) -> Result<EdwardsPoint> {
    let mut acc = EdwardsPoint::identity();
    for bytes in commitments {
        let point = CompressedEdwardsY(*bytes)
            .decompress()
            .ok_or_else(|| SignerError::crypto("nonce commitment", "invalid curve point"))?;
        acc += point;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keyring(total: u8) -> (Vec<EciesKeypair>, Vec<(ShardId, EciesPublicKey)>) {
        let keypairs: Vec<EciesKeypair> = (0..total).map(|_| EciesKeypair::generate()).collect();
        let publics = keypairs.iter().enumerate().map(|(i, kp)| ((i + 1) as ShardId, kp.public())).collect();
        (keypairs, publics)
    }

    #[test]
    fn offer_covers_every_shard_once() {
        let (_, publics) = keyring(3);
        let offer = generate_offer(1, 2, 3, &publics, &mut OsRng).expect("offer");
        assert_eq!(offer.origin, 1);
        let mut recipients: Vec<ShardId> = offer.shards.iter().map(|s| s.recipient).collect();
        recipients.sort_unstable();
        assert_eq!(recipients, vec![1, 2, 3]);
    }

    #[test]
    fn commitment_matches_interpolated_nonce() {
        let (keypairs, publics) = keyring(3);
        let offer = generate_offer(2, 2, 3, &publics, &mut OsRng).expect("offer");

        // Recover the nonce from shards 1 and 3 and check it against R_i.
        let mut recovered = Vec::new();
        for (idx, shard_id) in [(0usize, 1u8), (2, 3)] {
            let shard = offer.shards.iter().find(|s| s.recipient == shard_id).expect("shard");
            recovered.push((shard_id, decrypt_shard(&keypairs[idx], shard).expect("decrypt")));
        }
        let nonce = shamir::interpolate(&recovered).expect("interpolate");
        assert_eq!((ED25519_BASEPOINT_POINT * nonce).compress().to_bytes(), offer.commitment);
    }

    #[test]
    fn combined_shards_interpolate_to_summed_nonces() {
        let (keypairs, publics) = keyring(3);
        let offers: Vec<NonceOffer> =
            (1..=2).map(|origin| generate_offer(origin, 2, 3, &publics, &mut OsRng).expect("offer")).collect();

        // Each of shards 1 and 2 sums the shards addressed to it.
        let mut combined = Vec::new();
        for (idx, shard_id) in [(0usize, 1u8), (1, 2)] {
            let received: Vec<Scalar> = offers
                .iter()
                .map(|offer| {
                    let shard = offer.shards.iter().find(|s| s.recipient == shard_id).expect("shard");
                    decrypt_shard(&keypairs[idx], shard).expect("decrypt")
                })
                .collect();
            combined.push((shard_id, combine_shards(&received)));
        }

        let session_nonce = shamir::interpolate(&combined).expect("interpolate");
        let expected_r = aggregate_commitments(&[offers[0].commitment, offers[1].commitment]).expect("aggregate");
        assert_eq!(ED25519_BASEPOINT_POINT * session_nonce, expected_r);
    }

    #[test]
    fn missing_recipient_is_rejected() {
        let (_, mut publics) = keyring(3);
        publics.pop();
        assert!(generate_offer(1, 2, 3, &publics, &mut OsRng).is_err());
    }
}
