//! Raft-style single-leader coordination for the cosigner cluster.
//!
//! The replicated state machine is the last-signed high-water mark per
//! chain, so entries are self-contained and apply is idempotent and
//! monotonic: a follower accepts an entry only if it advances (or
//! completes, by filling in the signature of) its local mark. The leader
//! answers all signing sessions; a commit is acknowledged by a quorum of
//! `⌊N/2⌋+1` cosigners before the signature is released to a sentry.

use crate::cluster::client::PeerClient;
use crate::cluster::messages::{AppendEntries, LogEntry, PeerRequest, PeerResponse, RequestVote};
use crate::cluster::registry::Registry;
use log::{debug, info, warn};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tessera_core::domain::SignState;
use tessera_core::foundation::{ChainId, Result, ShardId, SignerError};
use tessera_core::infrastructure::storage::SignStateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

struct RaftState {
    term: u64,
    voted_for: Option<ShardId>,
    role: RaftRole,
    leader: Option<ShardId>,
    last_log_index: u64,
    commit_index: u64,
    election_deadline: Instant,
    last_heartbeat_sent: Instant,
}

enum TickAction {
    Idle,
    Heartbeat { term: u64, commit_index: u64 },
    Campaign { term: u64, last_log_index: u64 },
}

pub struct RaftNode {
    registry: Arc<Registry>,
    client: Arc<PeerClient>,
    store: Arc<dyn SignStateStore>,
    state: Mutex<RaftState>,
    heartbeat_interval: Duration,
    election_base: Duration,
}

fn election_timeout(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..base.as_millis().max(1) as u64);
    base + Duration::from_millis(jitter)
}

impl RaftNode {
    pub fn new(
        registry: Arc<Registry>,
        client: Arc<PeerClient>,
        store: Arc<dyn SignStateStore>,
        raft_timeout: Duration,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            registry,
            client,
            store,
            state: Mutex::new(RaftState {
                term: 0,
                voted_for: None,
                role: RaftRole::Follower,
                leader: None,
                last_log_index: 0,
                commit_index: 0,
                election_deadline: now + election_timeout(raft_timeout),
                last_heartbeat_sent: now,
            }),
            heartbeat_interval: raft_timeout / 3,
            election_base: raft_timeout,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RaftState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn own_shard(&self) -> ShardId {
        self.registry.own_shard()
    }

    pub fn current_leader(&self) -> (Option<ShardId>, u64) {
        let state = self.lock_state();
        (state.leader, state.term)
    }

    pub fn is_leader(&self) -> bool {
        self.lock_state().role == RaftRole::Leader
    }

    pub fn role(&self) -> RaftRole {
        self.lock_state().role
    }

    /// Force this node to campaign at the next tick (leadership transfer).
    pub fn campaign_now(&self) {
        self.lock_state().election_deadline = Instant::now();
    }

    /// Step down without waiting for a higher term (leadership transfer).
    pub fn step_down(&self) {
        let mut state = self.lock_state();
        if state.role == RaftRole::Leader {
            info!("stepping down shard_id={} term={}", self.registry.own_shard(), state.term);
        }
        state.role = RaftRole::Follower;
        state.leader = None;
        state.election_deadline = Instant::now() + election_timeout(self.election_base) + self.election_base;
    }

    pub fn spawn_driver(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        node.tick().await;
                    }
                }
            }
        })
    }

    async fn tick(&self) {
        let action = {
            let mut state = self.lock_state();
            let now = Instant::now();
            match state.role {
                RaftRole::Leader => {
                    if now.duration_since(state.last_heartbeat_sent) >= self.heartbeat_interval {
                        state.last_heartbeat_sent = now;
                        TickAction::Heartbeat { term: state.term, commit_index: state.commit_index }
                    } else {
                        TickAction::Idle
                    }
                }
                RaftRole::Follower | RaftRole::Candidate => {
                    if now >= state.election_deadline {
                        state.term += 1;
                        state.role = RaftRole::Candidate;
                        state.voted_for = Some(self.registry.own_shard());
                        state.leader = None;
                        state.election_deadline = now + election_timeout(self.election_base);
                        TickAction::Campaign { term: state.term, last_log_index: state.last_log_index }
                    } else {
                        TickAction::Idle
                    }
                }
            }
        };

        match action {
            TickAction::Idle => {}
            TickAction::Heartbeat { term, commit_index } => self.broadcast_heartbeat(term, commit_index).await,
            TickAction::Campaign { term, last_log_index } => self.campaign(term, last_log_index).await,
        }
    }

    async fn broadcast_heartbeat(&self, term: u64, commit_index: u64) {
        let request = AppendEntries { term, leader: self.registry.own_shard(), entries: Vec::new(), commit_index };
        let calls = self.registry.peers().map(|peer| {
            let client = Arc::clone(&self.client);
            let request = request.clone();
            let shard_id = peer.shard_id;
            async move { (shard_id, client.call(shard_id, PeerRequest::AppendEntries(request)).await) }
        });
        for (shard_id, result) in futures_join_all(calls).await {
            match result {
                Ok(PeerResponse::AppendAck { term: peer_term, .. }) if peer_term > term => {
                    self.observe_term(peer_term);
                    return;
                }
                Ok(_) => {}
                Err(err) => debug!("heartbeat to shard {} failed: {}", shard_id, err),
            }
        }
    }

    async fn campaign(&self, term: u64, last_log_index: u64) {
        info!("starting election shard_id={} term={}", self.registry.own_shard(), term);
        let request = RequestVote { term, candidate: self.registry.own_shard(), last_log_index };
        let calls = self.registry.peers().map(|peer| {
            let client = Arc::clone(&self.client);
            let request = request.clone();
            let shard_id = peer.shard_id;
            async move { (shard_id, client.call(shard_id, PeerRequest::RequestVote(request)).await) }
        });

        let mut granted = 1usize; // own vote
        for (shard_id, result) in futures_join_all(calls).await {
            match result {
                Ok(PeerResponse::Vote { term: peer_term, granted: peer_granted }) => {
                    if peer_term > term {
                        self.observe_term(peer_term);
                        return;
                    }
                    if peer_granted {
                        granted += 1;
                    }
                }
                Ok(other) => debug!("unexpected vote response from shard {}: {:?}", shard_id, other),
                Err(err) => debug!("vote request to shard {} failed: {}", shard_id, err),
            }
        }

        let won = {
            let mut state = self.lock_state();
            if state.term != term || state.role != RaftRole::Candidate {
                false
            } else if granted >= self.registry.quorum() {
                state.role = RaftRole::Leader;
                state.leader = Some(self.registry.own_shard());
                state.last_heartbeat_sent = Instant::now();
                true
            } else {
                false
            }
        };

        if won {
            info!("elected leader shard_id={} term={} votes={}", self.registry.own_shard(), term, granted);
            let commit_index = self.lock_state().commit_index;
            self.broadcast_heartbeat(term, commit_index).await;
        }
    }

    fn observe_term(&self, term: u64) {
        let mut state = self.lock_state();
        if term > state.term {
            state.term = term;
            state.voted_for = None;
            state.role = RaftRole::Follower;
            state.leader = None;
            state.election_deadline = Instant::now() + election_timeout(self.election_base);
        }
    }

    /// Apply one replicated entry to the local store. Accepts only
    /// advances, or a signature filling in an advanced-but-unsigned mark.
    fn apply_entry(&self, entry: &LogEntry) -> Result<bool> {
        let existing = self.store.load(&entry.chain_id)?;
        let apply = match &existing {
            None => true,
            Some(current) => {
                entry.state.hrs() > current.hrs()
                    || (entry.state.hrs() == current.hrs() && entry.state.has_signature() && !current.has_signature())
            }
        };
        if apply {
            self.store.commit(&entry.chain_id, &entry.state)?;
        }
        Ok(apply)
    }

    pub fn handle_request_vote(&self, request: RequestVote) -> PeerResponse {
        let mut state = self.lock_state();
        if request.term > state.term {
            state.term = request.term;
            state.voted_for = None;
            state.role = RaftRole::Follower;
            state.leader = None;
        }
        let up_to_date = request.last_log_index >= state.commit_index;
        let granted = request.term == state.term
            && up_to_date
            && state.voted_for.map(|voted| voted == request.candidate).unwrap_or(true);
        if granted {
            state.voted_for = Some(request.candidate);
            state.election_deadline = Instant::now() + election_timeout(self.election_base);
        }
        debug!(
            "vote request candidate={} term={} granted={} own_term={}",
            request.candidate, request.term, granted, state.term
        );
        PeerResponse::Vote { term: state.term, granted }
    }

    pub fn handle_append_entries(&self, request: AppendEntries) -> PeerResponse {
        {
            let mut state = self.lock_state();
            if request.term < state.term {
                return PeerResponse::AppendAck { term: state.term, success: false };
            }
            if request.term > state.term {
                state.voted_for = None;
            }
            state.term = request.term;
            state.role = RaftRole::Follower;
            state.leader = Some(request.leader);
            state.election_deadline = Instant::now() + election_timeout(self.election_base);
            state.commit_index = state.commit_index.max(request.commit_index);
            if let Some(last) = request.entries.last() {
                state.last_log_index = state.last_log_index.max(last.index);
            }
        }

        for entry in &request.entries {
            match self.apply_entry(entry) {
                Ok(applied) => {
                    if applied {
                        debug!(
                            "applied replicated mark chain_id={} height={} round={} step={}",
                            entry.chain_id, entry.state.height, entry.state.round, entry.state.step
                        );
                    }
                }
                Err(err) => {
                    warn!("failed to apply replicated mark chain_id={}: {}", entry.chain_id, err);
                    let term = self.lock_state().term;
                    return PeerResponse::AppendAck { term, success: false };
                }
            }
        }

        let term = self.lock_state().term;
        PeerResponse::AppendAck { term, success: true }
    }

    /// Leader-only: replicate a committed high-water mark to a quorum,
    /// then apply it locally. The signature is not released to a sentry
    /// until this returns.
    pub async fn propose_commit(&self, chain_id: &ChainId, state: SignState) -> Result<()> {
        let (term, index) = {
            let mut guard = self.lock_state();
            if guard.role != RaftRole::Leader {
                return Err(SignerError::NotLeader {
                    leader: guard.leader.map(|id| id.to_string()).unwrap_or_else(|| "unknown".to_string()),
                });
            }
            guard.last_log_index += 1;
            (guard.term, guard.last_log_index)
        };

        let entry = LogEntry { index, term, chain_id: chain_id.clone(), state };
        let request =
            AppendEntries { term, leader: self.registry.own_shard(), entries: vec![entry.clone()], commit_index: index };

        let calls = self.registry.peers().map(|peer| {
            let client = Arc::clone(&self.client);
            let request = request.clone();
            let shard_id = peer.shard_id;
            async move { (shard_id, client.call(shard_id, PeerRequest::AppendEntries(request)).await) }
        });

        let mut acks = 1usize; // the leader itself
        for (shard_id, result) in futures_join_all(calls).await {
            match result {
                Ok(PeerResponse::AppendAck { term: peer_term, success }) => {
                    if peer_term > term {
                        self.observe_term(peer_term);
                        return Err(SignerError::NotLeader { leader: "unknown".to_string() });
                    }
                    if success {
                        acks += 1;
                    }
                }
                Ok(other) => debug!("unexpected append response from shard {}: {:?}", shard_id, other),
                Err(err) => debug!("append to shard {} failed: {}", shard_id, err),
            }
        }

        if acks < self.registry.quorum() {
            return Err(SignerError::QuorumTimeout { required: self.registry.quorum(), responsive: acks });
        }

        self.apply_entry(&entry)?;
        let mut guard = self.lock_state();
        guard.commit_index = guard.commit_index.max(index);
        Ok(())
    }
}

/// Drive a set of per-peer call futures to completion concurrently.
async fn futures_join_all<F, T>(calls: impl Iterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<JoinHandle<T>> = calls.map(tokio::spawn).collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(result) = handle.await {
            results.push(result);
        }
    }
    results
}
