//! Application layer: the signing façade the sentry-facing service drives,
//! and the non-threshold single-key implementation of it.

pub mod privval_service;
pub mod single_signer;

use crate::domain::SignRequest;
use crate::foundation::Result;
use async_trait::async_trait;

/// The result handed back to a sentry: the signature, and the timestamp
/// the response must carry (differs from the request's under the
/// timestamp replay rule).
#[derive(Clone, Debug)]
pub struct SignedOutcome {
    pub signature: Vec<u8>,
    pub timestamp_nanos: u64,
}

/// The one operation and one query the core exposes.
///
/// Implemented by the single signer here and the threshold signer in the
/// service crate.
#[async_trait]
pub trait PrivValidator: Send + Sync {
    async fn sign(&self, request: SignRequest) -> Result<SignedOutcome>;
    fn public_key(&self) -> [u8; 32];
}

pub use privval_service::{PrivvalService, RequestCounters};
pub use single_signer::SingleSigner;
