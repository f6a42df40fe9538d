//! Shamir secret sharing over the Ed25519 scalar field.
//!
//! Shares are evaluations of a random polynomial with the secret as the
//! constant term; shard ids are the evaluation points, so id 0 is
//! reserved. Recovery interpolates at 0. The same arithmetic serves both
//! the long-term key shards (dealer ceremony) and the per-session nonce
//! shards.

use crate::foundation::{Result, ShardId, SignerError};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// One evaluation of the sharing polynomial, owned by shard `shard_id`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretShare {
    pub shard_id: ShardId,
    pub value: Scalar,
}

/// Sample a uniform scalar from 64 bytes of CSPRNG output.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut wide = Zeroizing::new([0u8; 64]);
    rng.fill_bytes(wide.as_mut());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Split `secret` into `total` shares, any `threshold` of which recover it.
pub fn split<R: RngCore + CryptoRng>(
    secret: &Scalar,
    threshold: u8,
    total: u8,
    rng: &mut R,
) -> Result<Vec<SecretShare>> {
    if threshold == 0 || total == 0 || threshold > total {
        return Err(SignerError::ConfigError(format!("invalid shamir parameters: {}-of-{}", threshold, total)));
    }

    // coefficients[0] is the secret; the rest are uniform.
    let mut coefficients: Vec<Scalar> = Vec::with_capacity(threshold as usize);
    coefficients.push(*secret);
    for _ in 1..threshold {
        coefficients.push(random_scalar(rng));
    }

    let shares = (1..=total).map(|shard_id| SecretShare { shard_id, value: evaluate(&coefficients, shard_id) }).collect();

    for coefficient in coefficients.iter_mut() {
        coefficient.zeroize();
    }

    Ok(shares)
}

/// Horner evaluation of the polynomial at `x = shard_id`.
fn evaluate(coefficients: &[Scalar], shard_id: ShardId) -> Scalar {
    let x = Scalar::from(u64::from(shard_id));
    let mut acc = Scalar::ZERO;
    for coefficient in coefficients.iter().rev() {
        acc = acc * x + coefficient;
    }
    acc
}

/// Lagrange coefficient for `shard_id` at x = 0 over the participant set.
///
/// Participants must be distinct and include `shard_id`.
pub fn lagrange_coefficient(shard_id: ShardId, participants: &[ShardId]) -> Result<Scalar> {
    if !participants.contains(&shard_id) {
        return Err(SignerError::ShardMismatch { expected: shard_id, actual: participants.first().copied().unwrap_or(0) });
    }
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    let xi = Scalar::from(u64::from(shard_id));
    for &other in participants {
        if other == shard_id {
            continue;
        }
        let xj = Scalar::from(u64::from(other));
        numerator *= xj;
        denominator *= xj - xi;
    }
    if denominator == Scalar::ZERO {
        return Err(SignerError::crypto("lagrange", "duplicate participant ids"));
    }
    Ok(numerator * denominator.invert())
}

/// Recover the secret (the polynomial at 0) from `threshold` or more shares.
pub fn interpolate(shares: &[(ShardId, Scalar)]) -> Result<Scalar> {
    let participants: Vec<ShardId> = shares.iter().map(|(id, _)| *id).collect();
    let mut acc = Scalar::ZERO;
    for (shard_id, value) in shares {
        acc += lagrange_coefficient(*shard_id, &participants)? * value;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn split_and_recover_2_of_3() {
        let secret = random_scalar(&mut OsRng);
        let shares = split(&secret, 2, 3, &mut OsRng).expect("split");
        assert_eq!(shares.len(), 3);

        for pair in [[0usize, 1], [0, 2], [1, 2]] {
            let subset: Vec<(ShardId, Scalar)> = pair.iter().map(|&i| (shares[i].shard_id, shares[i].value)).collect();
            assert_eq!(interpolate(&subset).expect("interpolate"), secret);
        }
    }

    #[test]
    fn split_and_recover_3_of_5() {
        let secret = random_scalar(&mut OsRng);
        let shares = split(&secret, 3, 5, &mut OsRng).expect("split");
        let subset: Vec<(ShardId, Scalar)> = shares[1..4].iter().map(|s| (s.shard_id, s.value)).collect();
        assert_eq!(interpolate(&subset).expect("interpolate"), secret);
    }

    #[test]
    fn below_threshold_recovers_garbage() {
        let secret = random_scalar(&mut OsRng);
        let shares = split(&secret, 3, 5, &mut OsRng).expect("split");
        let subset: Vec<(ShardId, Scalar)> = shares[..2].iter().map(|s| (s.shard_id, s.value)).collect();
        assert_ne!(interpolate(&subset).expect("interpolate"), secret);
    }

    #[test]
    fn invalid_parameters_rejected() {
        let secret = random_scalar(&mut OsRng);
        assert!(split(&secret, 0, 3, &mut OsRng).is_err());
        assert!(split(&secret, 4, 3, &mut OsRng).is_err());
    }

    #[test]
    fn lagrange_requires_membership() {
        assert!(lagrange_coefficient(4, &[1, 2, 3]).is_err());
    }
}
