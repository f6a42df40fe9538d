//! On-disk key material: the Ed25519 key shard, the cosigner's ECIES
//! keypair, and the cluster identity key. All three are 0600 JSON files
//! written atomically; loaders refuse group- or world-readable files and
//! zero intermediate buffers.

use crate::domain::ecies::EciesKeypair;
use crate::domain::threshold::KeyShard;
use crate::foundation::{Result, ShardId, SignerError};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

#[derive(Deserialize, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShardFile {
    pub shard_id: ShardId,
    pub private_share: String,
    pub group_pubkey: String,
}

#[derive(Deserialize, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct EciesKeyFile {
    pub private_key: String,
    pub public_key: String,
}

#[derive(Deserialize, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeyFile {
    pub private_key: String,
    pub public_key: String,
}

fn check_permissions(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path)
        .map_err(|err| SignerError::KeyFileError { path: path.display().to_string(), details: err.to_string() })?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(SignerError::InsecureFilePermissions { path: path.display().to_string(), mode });
    }
    Ok(())
}

fn read_key_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    check_permissions(path)?;
    let bytes = Zeroizing::new(
        fs::read(path).map_err(|err| SignerError::KeyFileError { path: path.display().to_string(), details: err.to_string() })?,
    );
    serde_json::from_slice(&bytes)
        .map_err(|err| SignerError::KeyFileError { path: path.display().to_string(), details: err.to_string() })
}

/// Write a key file with mode 0600, never leaving a partially written file.
pub fn write_key_file<T: Serialize>(path: &Path, contents: &T) -> Result<()> {
    let bytes = Zeroizing::new(serde_json::to_vec_pretty(contents)?);
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)
            .map_err(|err| SignerError::KeyFileError { path: tmp.display().to_string(), details: err.to_string() })?;
        file.write_all(&bytes)
            .map_err(|err| SignerError::KeyFileError { path: tmp.display().to_string(), details: err.to_string() })?;
        file.sync_all()
            .map_err(|err| SignerError::KeyFileError { path: tmp.display().to_string(), details: err.to_string() })?;
    }
    fs::rename(&tmp, path)
        .map_err(|err| SignerError::KeyFileError { path: path.display().to_string(), details: err.to_string() })?;
    Ok(())
}

fn decode_hex32(path: &Path, field: &str, value: &str) -> Result<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(hex::decode(value.trim()).map_err(|err| SignerError::KeyFileError {
        path: path.display().to_string(),
        details: format!("{}: {}", field, err),
    })?);
    let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| SignerError::KeyFileError {
        path: path.display().to_string(),
        details: format!("{} is not 32 bytes", field),
    })?;
    Ok(Zeroizing::new(array))
}

pub fn load_key_shard(path: &Path) -> Result<KeyShard> {
    let file: KeyShardFile = read_key_file(path)?;
    let share_bytes = decode_hex32(path, "private_share", &file.private_share)?;
    let share = Option::<Scalar>::from(Scalar::from_canonical_bytes(*share_bytes)).ok_or_else(|| SignerError::KeyFileError {
        path: path.display().to_string(),
        details: "private_share is not a canonical scalar".to_string(),
    })?;
    let group_pubkey = decode_hex32(path, "group_pubkey", &file.group_pubkey)?;
    if file.shard_id == 0 {
        return Err(SignerError::KeyFileError { path: path.display().to_string(), details: "shard_id 0 is reserved".to_string() });
    }
    Ok(KeyShard { shard_id: file.shard_id, share, group_pubkey: *group_pubkey })
}

pub fn save_key_shard(path: &Path, shard: &KeyShard) -> Result<()> {
    let file = KeyShardFile {
        shard_id: shard.shard_id,
        private_share: hex::encode(shard.share.to_bytes()),
        group_pubkey: hex::encode(shard.group_pubkey),
    };
    write_key_file(path, &file)
}

pub fn load_ecies_keypair(path: &Path) -> Result<EciesKeypair> {
    let file: EciesKeyFile = read_key_file(path)?;
    let secret = decode_hex32(path, "private_key", &file.private_key)?;
    Ok(EciesKeypair::from_secret_bytes(*secret))
}

pub fn save_ecies_keypair(path: &Path, keypair: &EciesKeypair) -> Result<()> {
    let file = EciesKeyFile {
        private_key: hex::encode(keypair.secret_bytes().as_ref()),
        public_key: hex::encode(keypair.public().0),
    };
    write_key_file(path, &file)
}

pub fn load_identity_key(path: &Path) -> Result<SigningKey> {
    let file: IdentityKeyFile = read_key_file(path)?;
    let seed = decode_hex32(path, "private_key", &file.private_key)?;
    Ok(SigningKey::from_bytes(&seed))
}

pub fn save_identity_key(path: &Path, key: &SigningKey) -> Result<()> {
    let file = IdentityKeyFile {
        private_key: hex::encode(key.to_bytes()),
        public_key: hex::encode(key.verifying_key().to_bytes()),
    };
    write_key_file(path, &file)
}
