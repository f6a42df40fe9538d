use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tessera_core::domain::ecies::EciesPublicKey;
use tessera_core::foundation::{Hash32, Result, ShardId, SignerError};
use tessera_core::infrastructure::config::ThresholdSection;

/// One resolved cluster member.
#[derive(Clone, Debug)]
pub struct CosignerPeer {
    pub shard_id: ShardId,
    pub addr: String,
    pub identity: VerifyingKey,
    pub ecies: EciesPublicKey,
}

/// The resolved cosigner registry: who exists, where they listen, and the
/// keys their envelopes and nonce shards are checked against.
#[derive(Clone, Debug)]
pub struct Registry {
    own_shard: ShardId,
    threshold: u8,
    members: Vec<CosignerPeer>,
}

impl Registry {
    pub fn from_config(section: &ThresholdSection) -> Result<Self> {
        let mut members = Vec::with_capacity(section.cosigners.len());
        for entry in &section.cosigners {
            members.push(CosignerPeer {
                shard_id: entry.shard_id,
                addr: entry.p2p_addr.clone(),
                identity: entry.identity_key()?,
                ecies: entry.ecies_key()?,
            });
        }
        members.sort_by_key(|peer| peer.shard_id);
        Ok(Self { own_shard: section.shard_id, threshold: section.threshold, members })
    }

    pub fn own_shard(&self) -> ShardId {
        self.own_shard
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn total(&self) -> u8 {
        self.members.len() as u8
    }

    pub fn quorum(&self) -> usize {
        usize::from(self.total()) / 2 + 1
    }

    pub fn get(&self, shard_id: ShardId) -> Option<&CosignerPeer> {
        self.members.iter().find(|peer| peer.shard_id == shard_id)
    }

    /// Every member except this cosigner, in shard order.
    pub fn peers(&self) -> impl Iterator<Item = &CosignerPeer> {
        let own = self.own_shard;
        self.members.iter().filter(move |peer| peer.shard_id != own)
    }

    /// ECIES recipient set covering the whole cluster, for nonce sharding.
    pub fn ecies_recipients(&self) -> Vec<(ShardId, EciesPublicKey)> {
        self.members.iter().map(|peer| (peer.shard_id, peer.ecies)).collect()
    }

    /// Check an envelope signature against the claimed sender's identity.
    pub fn verify(&self, sender: ShardId, payload_hash: &Hash32, signature: &[u8]) -> Result<()> {
        let peer = self.get(sender).ok_or(SignerError::InvalidPeerIdentity { shard_id: sender })?;
        let signature =
            Signature::from_slice(signature).map_err(|_| SignerError::InvalidPeerIdentity { shard_id: sender })?;
        peer.identity
            .verify(payload_hash, &signature)
            .map_err(|_| SignerError::InvalidPeerIdentity { shard_id: sender })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use tessera_core::infrastructure::config::CosignerEntry;

    fn section(keys: &[SigningKey]) -> ThresholdSection {
        ThresholdSection {
            threshold: 2,
            shard_id: 1,
            listen_addr: "127.0.0.1:0".to_string(),
            cosigners: keys
                .iter()
                .enumerate()
                .map(|(i, key)| CosignerEntry {
                    shard_id: (i + 1) as ShardId,
                    p2p_addr: format!("127.0.0.1:55{:02}", i + 1),
                    identity_pubkey: hex::encode(key.verifying_key().to_bytes()),
                    ecies_pubkey: hex::encode([0x11u8; 32]),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn verify_accepts_registered_peer_and_rejects_others() {
        let keys: Vec<SigningKey> = (0..3).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let registry = Registry::from_config(&section(&keys)).expect("registry");

        let hash = [0x42u8; 32];
        let signature = keys[1].sign(&hash).to_bytes().to_vec();
        registry.verify(2, &hash, &signature).expect("valid signature");

        // Wrong sender id for that signature.
        assert!(registry.verify(3, &hash, &signature).is_err());
        // Unknown shard.
        assert!(registry.verify(9, &hash, &signature).is_err());
    }

    #[test]
    fn peers_excludes_self() {
        let keys: Vec<SigningKey> = (0..3).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let registry = Registry::from_config(&section(&keys)).expect("registry");
        let ids: Vec<ShardId> = registry.peers().map(|p| p.shard_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(registry.quorum(), 2);
    }
}
