//! Cosigner cluster networking: signed RPC envelopes, the framed TCP
//! client and listener, the resolved registry, and raft-style leader
//! coordination.

pub mod client;
pub mod messages;
pub mod raft;
pub mod registry;
pub mod server;

pub use client::{PeerClient, PeerHealth};
pub use messages::{PeerEnvelope, PeerPayload, PeerRequest, PeerResponse};
pub use raft::{RaftNode, RaftRole};
pub use registry::{CosignerPeer, Registry};
pub use server::{ClusterHandler, ClusterServer};
