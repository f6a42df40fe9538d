use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BeyondBlock,
    ConflictingData,
    NotLeader,
    PeerUnreachable,
    QuorumTimeout,
    SessionTimeout,
    SessionInProgress,
    NonceAlreadyUsed,
    ThresholdNotMet,
    SignatureInvalid,
    InvalidPeerIdentity,
    InvalidPublicKey,
    ShardMismatch,
    StorageError,
    SerializationError,
    DecodeError,
    CryptoError,
    TransportError,
    HandshakeFailed,
    MessageTooLarge,
    KeyFileError,
    InsecureFilePermissions,
    ConfigError,
    ShuttingDown,
    Unimplemented,
    Message,
}

#[derive(Debug, Error)]
pub enum SignerError {
    /// The request is at or below the high-water mark and must not be signed.
    #[error("{chain_id} beyond block: {details}")]
    BeyondBlock { chain_id: String, details: String },

    /// Same (height, round, step) as the high-water mark but different
    /// non-timestamp bytes. A sentry asking for this is a double-sign attempt.
    #[error("conflicting data at height {height} round {round} step {step}: {details}")]
    ConflictingData { height: u64, round: i32, step: u8, details: String },

    #[error("this cosigner is not the leader (current leader: {leader})")]
    NotLeader { leader: String },

    #[error("cosigner {shard_id} unreachable: {details}")]
    PeerUnreachable { shard_id: u8, details: String },

    #[error("quorum not reached: required {required}, responsive {responsive}")]
    QuorumTimeout { required: usize, responsive: usize },

    #[error("signing session timed out after {timeout_ms}ms")]
    SessionTimeout { timeout_ms: u64 },

    #[error("signing session already in progress")]
    SessionInProgress,

    #[error("nonce shares for this session were already consumed")]
    NonceAlreadyUsed,

    #[error("threshold not met: required {required}, received {received}")]
    ThresholdNotMet { required: usize, received: usize },

    #[error("aggregated signature failed verification")]
    SignatureInvalid,

    #[error("invalid peer identity for shard {shard_id}")]
    InvalidPeerIdentity { shard_id: u8 },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("shard id mismatch: expected {expected}, got {actual}")]
    ShardMismatch { expected: u8, actual: u8 },

    #[error("storage error during {operation}: {details}")]
    StorageError { operation: String, details: String },

    #[error("{format} serialization error: {details}")]
    SerializationError { format: String, details: String },

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("crypto error during {operation}: {details}")]
    CryptoError { operation: String, details: String },

    #[error("transport error during {operation}: {details}")]
    TransportError { operation: String, details: String },

    #[error("secret handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("message too large: {size} exceeds max {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("key file error: {path}: {details}")]
    KeyFileError { path: String, details: String },

    #[error("insecure key file permissions: {path} has mode {mode:o}, expected 0600")]
    InsecureFilePermissions { path: String, mode: u32 },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("signer is shutting down")]
    ShuttingDown,

    #[error("feature not implemented: {0}")]
    Unimplemented(String),

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, SignerError>;

impl SignerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SignerError::BeyondBlock { .. } => ErrorCode::BeyondBlock,
            SignerError::ConflictingData { .. } => ErrorCode::ConflictingData,
            SignerError::NotLeader { .. } => ErrorCode::NotLeader,
            SignerError::PeerUnreachable { .. } => ErrorCode::PeerUnreachable,
            SignerError::QuorumTimeout { .. } => ErrorCode::QuorumTimeout,
            SignerError::SessionTimeout { .. } => ErrorCode::SessionTimeout,
            SignerError::SessionInProgress => ErrorCode::SessionInProgress,
            SignerError::NonceAlreadyUsed => ErrorCode::NonceAlreadyUsed,
            SignerError::ThresholdNotMet { .. } => ErrorCode::ThresholdNotMet,
            SignerError::SignatureInvalid => ErrorCode::SignatureInvalid,
            SignerError::InvalidPeerIdentity { .. } => ErrorCode::InvalidPeerIdentity,
            SignerError::InvalidPublicKey(_) => ErrorCode::InvalidPublicKey,
            SignerError::ShardMismatch { .. } => ErrorCode::ShardMismatch,
            SignerError::StorageError { .. } => ErrorCode::StorageError,
            SignerError::SerializationError { .. } => ErrorCode::SerializationError,
            SignerError::DecodeError(_) => ErrorCode::DecodeError,
            SignerError::CryptoError { .. } => ErrorCode::CryptoError,
            SignerError::TransportError { .. } => ErrorCode::TransportError,
            SignerError::HandshakeFailed(_) => ErrorCode::HandshakeFailed,
            SignerError::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
            SignerError::KeyFileError { .. } => ErrorCode::KeyFileError,
            SignerError::InsecureFilePermissions { .. } => ErrorCode::InsecureFilePermissions,
            SignerError::ConfigError(_) => ErrorCode::ConfigError,
            SignerError::ShuttingDown => ErrorCode::ShuttingDown,
            SignerError::Unimplemented(_) => ErrorCode::Unimplemented,
            SignerError::Message(_) => ErrorCode::Message,
        }
    }

    /// Numeric code carried inside `RemoteSignerError` on the privval wire.
    pub fn wire_code(&self) -> i32 {
        self.code() as i32 + 1
    }

    /// Errors the sentry may retry at the next block opportunity.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SignerError::NotLeader { .. }
                | SignerError::PeerUnreachable { .. }
                | SignerError::QuorumTimeout { .. }
                | SignerError::SessionTimeout { .. }
                | SignerError::SessionInProgress
        )
    }

    pub fn storage(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        SignerError::StorageError { operation: operation.into(), details: details.to_string() }
    }

    pub fn crypto(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        SignerError::CryptoError { operation: operation.into(), details: details.to_string() }
    }

    pub fn transport(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        SignerError::TransportError { operation: operation.into(), details: details.to_string() }
    }
}

impl From<io::Error> for SignerError {
    fn from(err: io::Error) -> Self {
        SignerError::TransportError { operation: "io".to_string(), details: err.to_string() }
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(err: serde_json::Error) -> Self {
        SignerError::SerializationError { format: "json".to_string(), details: err.to_string() }
    }
}

impl From<bincode::Error> for SignerError {
    fn from(err: bincode::Error) -> Self {
        SignerError::SerializationError { format: "bincode".to_string(), details: err.to_string() }
    }
}

impl From<toml::de::Error> for SignerError {
    fn from(err: toml::de::Error) -> Self {
        SignerError::ConfigError(format!("TOML parsing error: {}", err))
    }
}

impl From<prost::DecodeError> for SignerError {
    fn from(err: prost::DecodeError) -> Self {
        SignerError::DecodeError(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for SignerError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        SignerError::CryptoError { operation: "ed25519".to_string(), details: err.to_string() }
    }
}

impl From<hex::FromHexError> for SignerError {
    fn from(err: hex::FromHexError) -> Self {
        SignerError::DecodeError(format!("hex decode error: {}", err))
    }
}

#[macro_export]
macro_rules! storage_err {
    ($op:expr, $err:expr) => {
        $crate::foundation::SignerError::StorageError { operation: $op.into(), details: $err.to_string() }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_render() {
        let err = SignerError::BeyondBlock { chain_id: "test-chain".to_string(), details: "height regression".to_string() };
        assert!(err.to_string().contains("beyond block"));
        assert_eq!(err.code(), ErrorCode::BeyondBlock);

        let err = SignerError::QuorumTimeout { required: 2, responsive: 1 };
        assert!(err.to_string().contains("quorum"));
        assert!(err.is_retryable());

        let err = SignerError::ConflictingData { height: 10, round: 0, step: 2, details: "block id differs".to_string() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn wire_codes_are_nonzero() {
        assert!(SignerError::BeyondBlock { chain_id: String::new(), details: String::new() }.wire_code() > 0);
        assert!(SignerError::Message(String::new()).wire_code() > 0);
    }
}
