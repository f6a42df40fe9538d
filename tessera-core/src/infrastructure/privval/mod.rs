//! The privval wire protocol: protobuf schema, canonical sign-bytes, and
//! message encode/decode.

pub mod canonical;
pub mod codec;
pub mod proto;

pub use canonical::{
    canonical_proposal_bytes, canonical_vote_bytes, sign_request_from_proposal, sign_request_from_vote,
    timestamp_from_nanos,
};
pub use codec::{decode_message, encode_message, MAX_MESSAGE_SIZE};
