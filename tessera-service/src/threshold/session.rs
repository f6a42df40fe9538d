//! Session bookkeeping for threshold signing.
//!
//! Two concerns share the table: per-session async locks collapsing
//! concurrent requests for the same (chain, height, round, step), and the
//! single-use set refusing a second `SetNoncesAndSign` for a session that
//! already produced a partial signature.

use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tessera_core::domain::SessionKey;

const PRUNE_THRESHOLD: usize = 4096;

#[derive(Default)]
pub struct SessionTable {
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
    used: Mutex<HashSet<SessionKey>>,
}

impl SessionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The lock serializing sessions with this key. Entries for heights
    /// far below the current request are pruned opportunistically.
    pub fn lock_for(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.len() > PRUNE_THRESHOLD {
            let height = key.height;
            locks.retain(|k, _| k.height + 64 >= height);
        }
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Record that a partial signature was produced for this session.
    /// Returns false if one already was, in which case the caller must
    /// refuse to produce another.
    pub fn mark_used(&self, key: &SessionKey) -> bool {
        let mut used = self.used.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if used.len() > PRUNE_THRESHOLD {
            let height = key.height;
            used.retain(|k| k.height + 64 >= height);
        }
        let fresh = used.insert(key.clone());
        if !fresh {
            debug!("session already used key={}", key);
        }
        fresh
    }

    pub fn is_used(&self, key: &SessionKey) -> bool {
        self.used.lock().map(|used| used.contains(key)).unwrap_or(false)
    }
}
