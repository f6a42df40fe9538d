//! Asymmetric encryption for nonce shards in transit between cosigners.
//!
//! Sealed-box construction: ephemeral X25519 against the recipient's
//! static key, symmetric key derived with a keyed blake3 context over the
//! shared secret and both public keys, payload sealed with
//! ChaCha20-Poly1305. Output layout: ephemeral pubkey (32) ‖ nonce (12) ‖
//! ciphertext.

use crate::foundation::{Result, SignerError};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

const KDF_CONTEXT: &str = "tessera ecies shard v1";
const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EciesPublicKey(pub [u8; 32]);

impl EciesPublicKey {
    fn to_x25519(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

pub struct EciesKeypair {
    secret: StaticSecret,
    public: EciesPublicKey,
}

impl EciesKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = EciesPublicKey(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = EciesPublicKey(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public(&self) -> EciesPublicKey {
        self.public
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }
}

fn derive_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut material = Zeroizing::new([0u8; 96]);
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral);
    material[64..].copy_from_slice(recipient);
    Zeroizing::new(blake3::derive_key(KDF_CONTEXT, material.as_ref()))
}

/// Encrypt `plaintext` so only the holder of `recipient`'s secret can read it.
pub fn seal(recipient: &EciesPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
    let shared = Zeroizing::new(ephemeral.diffie_hellman(&recipient.to_x25519()).to_bytes());
    let key = derive_key(&shared, &ephemeral_public, &recipient.0);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let ciphertext =
        cipher.encrypt(Nonce::from_slice(&nonce), plaintext).map_err(|err| SignerError::crypto("ecies seal", err))?;

    let mut out = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed payload with the recipient keypair.
pub fn open(keypair: &EciesKeypair, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < EPHEMERAL_LEN + NONCE_LEN {
        return Err(SignerError::crypto("ecies open", "payload too short"));
    }
    let (ephemeral_bytes, rest) = data.split_at(EPHEMERAL_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let ephemeral_public: [u8; 32] = ephemeral_bytes.try_into().expect("length checked above");
    let shared = Zeroizing::new(keypair.secret.diffie_hellman(&PublicKey::from(ephemeral_public)).to_bytes());
    let key = derive_key(&shared, &ephemeral_public, &keypair.public.0);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let plaintext =
        cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext).map_err(|err| SignerError::crypto("ecies open", err))?;
    Ok(Zeroizing::new(plaintext))
}
