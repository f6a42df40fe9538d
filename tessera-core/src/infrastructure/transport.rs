//! The authenticated-encrypted stream between a cosigner and a sentry.
//!
//! Handshake: both sides exchange ephemeral X25519 keys in the clear,
//! derive directional ChaCha20-Poly1305 keys and a challenge transcript
//! from the shared secret with keyed blake3, then prove their Ed25519
//! identity by exchanging a signature over the challenge inside the first
//! encrypted frame.
//!
//! Framing: 4-byte big-endian ciphertext length, then the ciphertext; one
//! frame carries one protobuf message. Frame nonces are a per-direction
//! 64-bit counter, so a torn or replayed frame fails authentication and
//! tears the channel down.

use crate::foundation::{Result, SignerError};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

const KDF_KEY_LOW_TO_HIGH: &str = "tessera secret connection v1 low-to-high";
const KDF_KEY_HIGH_TO_LOW: &str = "tessera secret connection v1 high-to-low";
const KDF_CHALLENGE: &str = "tessera secret connection v1 challenge";

const FRAME_HEADER_LEN: usize = 4;
const AEAD_TAG_LEN: usize = 16;
const AUTH_FRAME_LEN: usize = 96;
pub const MAX_FRAME_SIZE: usize = crate::infrastructure::privval::MAX_MESSAGE_SIZE + AEAD_TAG_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Dialer,
    Listener,
}

pub struct SecretConnection<S> {
    io: S,
    send_cipher: ChaCha20Poly1305,
    recv_cipher: ChaCha20Poly1305,
    send_seq: u64,
    recv_seq: u64,
    remote_identity: VerifyingKey,
}

fn counter_nonce(seq: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..].copy_from_slice(&seq.to_be_bytes());
    *Nonce::from_slice(&bytes)
}

async fn read_exact_frame<S: AsyncRead + Unpin>(io: &mut S) -> Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    io.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(SignerError::MessageTooLarge { size: len, max: MAX_FRAME_SIZE });
    }
    let mut frame = vec![0u8; len];
    io.read_exact(&mut frame).await?;
    Ok(frame)
}

async fn write_frame<S: AsyncWrite + Unpin>(io: &mut S, frame: &[u8]) -> Result<()> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(SignerError::MessageTooLarge { size: frame.len(), max: MAX_FRAME_SIZE });
    }
    io.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    io.write_all(frame).await?;
    io.flush().await?;
    Ok(())
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SecretConnection<S> {
    /// Run the handshake and return an established channel.
    pub async fn handshake(mut io: S, identity: &SigningKey, role: Role) -> Result<Self> {
        let local_ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let local_public = PublicKey::from(&local_ephemeral);

        write_frame(&mut io, local_public.as_bytes()).await?;
        let remote_bytes = read_exact_frame(&mut io).await?;
        let remote_public: [u8; 32] = remote_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignerError::HandshakeFailed("ephemeral key is not 32 bytes".to_string()))?;

        let shared = Zeroizing::new(local_ephemeral.diffie_hellman(&PublicKey::from(remote_public)).to_bytes());

        // Canonical transcript order so both sides derive identical keys.
        let (low, high) = if local_public.as_bytes() <= &remote_public {
            (*local_public.as_bytes(), remote_public)
        } else {
            (remote_public, *local_public.as_bytes())
        };
        let mut material = Zeroizing::new([0u8; 96]);
        material[..32].copy_from_slice(shared.as_ref());
        material[32..64].copy_from_slice(&low);
        material[64..].copy_from_slice(&high);

        let low_to_high = Zeroizing::new(blake3::derive_key(KDF_KEY_LOW_TO_HIGH, material.as_ref()));
        let high_to_low = Zeroizing::new(blake3::derive_key(KDF_KEY_HIGH_TO_LOW, material.as_ref()));
        let challenge = blake3::derive_key(KDF_CHALLENGE, material.as_ref());

        let local_is_low = local_public.as_bytes() == &low;
        let (send_key, recv_key) = if local_is_low { (low_to_high, high_to_low) } else { (high_to_low, low_to_high) };
        let send_cipher = ChaCha20Poly1305::new(Key::from_slice(send_key.as_ref()));
        let recv_cipher = ChaCha20Poly1305::new(Key::from_slice(recv_key.as_ref()));

        let mut conn = Self {
            io,
            send_cipher,
            recv_cipher,
            send_seq: 0,
            recv_seq: 0,
            // Placeholder until the auth frames are exchanged.
            remote_identity: identity.verifying_key(),
        };

        // Identity proof: pubkey ‖ signature over the challenge, inside the
        // first encrypted frame. The dialer speaks first.
        let mut auth = [0u8; AUTH_FRAME_LEN];
        auth[..32].copy_from_slice(&identity.verifying_key().to_bytes());
        auth[32..].copy_from_slice(&identity.sign(&challenge).to_bytes());

        let remote_auth = match role {
            Role::Dialer => {
                conn.send_frame(&auth).await?;
                conn.recv_frame().await?
            }
            Role::Listener => {
                let remote_auth = conn.recv_frame().await?;
                conn.send_frame(&auth).await?;
                remote_auth
            }
        };

        if remote_auth.len() != AUTH_FRAME_LEN {
            return Err(SignerError::HandshakeFailed("malformed identity frame".to_string()));
        }
        let remote_pubkey: [u8; 32] = remote_auth[..32].try_into().expect("length checked above");
        let remote_identity = VerifyingKey::from_bytes(&remote_pubkey)
            .map_err(|err| SignerError::HandshakeFailed(format!("invalid identity key: {}", err)))?;
        let signature = Signature::from_slice(&remote_auth[32..])
            .map_err(|err| SignerError::HandshakeFailed(format!("invalid identity signature: {}", err)))?;
        remote_identity
            .verify(&challenge, &signature)
            .map_err(|_| SignerError::HandshakeFailed("identity signature verification failed".to_string()))?;

        conn.remote_identity = remote_identity;
        Ok(conn)
    }

    pub fn remote_identity(&self) -> VerifyingKey {
        self.remote_identity
    }

    pub async fn send_frame(&mut self, plaintext: &[u8]) -> Result<()> {
        let nonce = counter_nonce(self.send_seq);
        let ciphertext = self
            .send_cipher
            .encrypt(&nonce, plaintext)
            .map_err(|err| SignerError::crypto("frame encrypt", err))?;
        self.send_seq = self.send_seq.checked_add(1).ok_or_else(|| SignerError::transport("send", "nonce exhausted"))?;
        write_frame(&mut self.io, &ciphertext).await
    }

    pub async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        let ciphertext = read_exact_frame(&mut self.io).await?;
        let nonce = counter_nonce(self.recv_seq);
        let plaintext = self
            .recv_cipher
            .decrypt(&nonce, ciphertext.as_slice())
            .map_err(|_| SignerError::transport("frame decrypt", "authentication failed"))?;
        self.recv_seq = self.recv_seq.checked_add(1).ok_or_else(|| SignerError::transport("recv", "nonce exhausted"))?;
        Ok(plaintext)
    }
}
