use super::proto::PrivvalMessage;
use crate::foundation::{Result, SignerError};
use prost::Message;

/// Upper bound on a privval frame; anything larger is a protocol violation.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

pub fn encode_message(message: &PrivvalMessage) -> Result<Vec<u8>> {
    let bytes = message.encode_to_vec();
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(SignerError::MessageTooLarge { size: bytes.len(), max: MAX_MESSAGE_SIZE });
    }
    Ok(bytes)
}

pub fn decode_message(bytes: &[u8]) -> Result<PrivvalMessage> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(SignerError::MessageTooLarge { size: bytes.len(), max: MAX_MESSAGE_SIZE });
    }
    Ok(PrivvalMessage::decode(bytes)?)
}
