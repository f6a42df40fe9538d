use super::SignStateStore;
use crate::domain::SignState;
use crate::foundation::{ChainId, Result, SignerError};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-memory store for tests and the integration harness.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<ChainId, SignState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, HashMap<ChainId, SignState>>> {
        self.inner.lock().map_err(|_| SignerError::storage("memory store", "lock poisoned"))
    }
}

impl SignStateStore for MemoryStateStore {
    fn load(&self, chain_id: &ChainId) -> Result<Option<SignState>> {
        Ok(self.lock_inner()?.get(chain_id).cloned())
    }

    fn commit(&self, chain_id: &ChainId, state: &SignState) -> Result<()> {
        self.lock_inner()?.insert(chain_id.clone(), state.clone());
        Ok(())
    }
}
