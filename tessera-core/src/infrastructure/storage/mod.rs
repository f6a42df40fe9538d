mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::domain::SignState;
use crate::foundation::{ChainId, Result};

/// Durable mapping `chain_id -> high-water mark`.
///
/// `commit` must be durable before it returns: a crash immediately after a
/// successful commit must not lose the mark, or the next request could be
/// double-signed. Written only through the replicated apply path in
/// threshold mode, or directly by the single signer.
pub trait SignStateStore: Send + Sync {
    fn load(&self, chain_id: &ChainId) -> Result<Option<SignState>>;
    fn commit(&self, chain_id: &ChainId, state: &SignState) -> Result<()>;
}
