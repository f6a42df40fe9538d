//! The threshold signing pipeline: peer-side cosigner node, leader-side
//! session orchestration, and session bookkeeping.

pub mod node;
pub mod session;
pub mod signer;

pub use node::CosignerNode;
pub use session::SessionTable;
pub use signer::ThresholdSigner;
