//! # Session Registry
//!
//! Per-client query accounting for the model server.
//!
//! ## Lifecycle
//! ```text
//! CREATED --probe--> ACTIVE --last query--> EXHAUSTED
//!    |                  |                       |
//!    +------------------+--- close -------------+--> CLOSED (removed)
//! ```
//!
//! ## Locking
//! The registry map sits behind an `RwLock`; every session has its own
//! `Mutex`. A caller may take the map lock and then a session lock, never the
//! reverse, and the map lock is released before a probe runs inference, so
//! slow models never block unrelated sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::error::constants::{ERR_REGISTRY_LOCK, ERR_SESSION_LOCK};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Response, SessionId};
use crate::utils::metrics::global_metrics;
use crate::utils::ReplayCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opened, no query answered yet
    Created,
    /// At least one query answered, budget left
    Active,
    /// Every query of the budget consumed
    Exhausted,
    /// Closed by the client; terminal
    Closed,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub budget: u64,
    pub consumed: u64,
    pub age: Duration,
    /// Probe ids whose replies are held for redelivery
    pub cached_replies: usize,
}

impl SessionInfo {
    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.consumed)
    }
}

/// Accounting state of one session. `consumed <= budget` always holds.
#[derive(Debug)]
pub(crate) struct SessionRecord {
    id: SessionId,
    budget: u64,
    consumed: u64,
    state: SessionState,
    created_at: Instant,
    /// Replies by probe id, for redelivered probes
    replies: ReplayCache<Response>,
}

impl SessionRecord {
    fn new(id: SessionId, budget: u64, probe_cache_size: usize) -> Self {
        Self {
            id,
            budget,
            consumed: 0,
            state: SessionState::Created,
            created_at: Instant::now(),
            replies: ReplayCache::with_capacity(probe_cache_size),
        }
    }

    pub(crate) fn budget(&self) -> u64 {
        self.budget
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.budget - self.consumed
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    /// Fail unless one more query may be answered.
    pub(crate) fn ensure_available(&self) -> Result<()> {
        match self.state {
            SessionState::Closed => Err(ProtocolError::SessionNotFound(self.id.to_string())),
            _ if self.consumed >= self.budget => Err(ProtocolError::BudgetExceeded {
                budget: self.budget,
            }),
            _ => Ok(()),
        }
    }

    /// Count one answered query.
    pub(crate) fn charge(&mut self) {
        self.consumed += 1;
        self.state = if self.consumed == self.budget {
            SessionState::Exhausted
        } else {
            SessionState::Active
        };
        trace!(session = %self.id, consumed = self.consumed, budget = self.budget, "Query charged");
    }

    pub(crate) fn cached_reply(&self, probe_id: &str) -> Option<Response> {
        self.replies.lookup(probe_id)
    }

    pub(crate) fn remember_reply(&mut self, probe_id: &str, reply: &Response) {
        self.replies.remember(probe_id, reply.clone());
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state,
            budget: self.budget,
            consumed: self.consumed,
            age: self.created_at.elapsed(),
            cached_replies: self.replies.stats().entries,
        }
    }
}

pub(crate) type SessionHandle = Arc<Mutex<SessionRecord>>;

/// All open sessions of one server.
pub(crate) struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    max_sessions: usize,
    ttl: Duration,
    probe_cache_size: usize,
}

impl SessionRegistry {
    pub(crate) fn new(max_sessions: usize, ttl: Duration, probe_cache_size: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            ttl,
            probe_cache_size,
        }
    }

    /// Register a fresh session, evicting expired ones first.
    pub(crate) fn open(&self, budget: u64) -> Result<SessionId> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_LOCK.to_string()))?;

        self.evict_expired(&mut sessions);
        if sessions.len() >= self.max_sessions {
            return Err(ProtocolError::TooManySessions(self.max_sessions));
        }

        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let record = SessionRecord::new(id.clone(), budget, self.probe_cache_size);
        sessions.insert(id.clone(), Arc::new(Mutex::new(record)));
        global_metrics().session_opened();
        info!(session = %id, budget, open_sessions = sessions.len(), "Session opened");
        Ok(id)
    }

    /// Live session by id. Expired sessions are removed and reported missing.
    pub(crate) fn get(&self, id: &SessionId) -> Result<SessionHandle> {
        let handle = {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_LOCK.to_string()))?;
            sessions.get(id).cloned()
        }
        .ok_or_else(|| ProtocolError::SessionNotFound(id.to_string()))?;

        let expired = lock_session(&handle)?.is_expired(self.ttl);
        if expired {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_LOCK.to_string()))?;
            if sessions.remove(id).is_some() {
                global_metrics().record_expired(1);
                debug!(session = %id, "Session expired");
            }
            return Err(ProtocolError::SessionNotFound(id.to_string()));
        }

        Ok(handle)
    }

    /// Remove a session. Returns `false` if it was already gone.
    pub(crate) fn close(&self, id: &SessionId) -> Result<bool> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_LOCK.to_string()))?
            .remove(id);

        match removed {
            Some(handle) => {
                // A probe that already holds the handle sees CLOSED and fails.
                let mut record = lock_session(&handle)?;
                record.state = SessionState::Closed;
                global_metrics().session_closed();
                info!(session = %id, consumed = record.consumed, budget = record.budget, "Session closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn info(&self, id: &SessionId) -> Result<SessionInfo> {
        let handle = self.get(id)?;
        let record = lock_session(&handle)?;
        Ok(record.info())
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Drop every expired session now.
    pub(crate) fn purge_expired(&self) -> Result<usize> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_LOCK.to_string()))?;
        Ok(self.evict_expired(&mut sessions))
    }

    fn evict_expired(&self, sessions: &mut HashMap<SessionId, SessionHandle>) -> usize {
        let before = sessions.len();
        // Sessions busy with a probe are in use and skipped this round.
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(record) => !record.is_expired(self.ttl),
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            global_metrics().record_expired(evicted as u64);
            debug!(evicted, "Evicted expired sessions");
        }
        evicted
    }
}

pub(crate) fn lock_session(handle: &SessionHandle) -> Result<std::sync::MutexGuard<'_, SessionRecord>> {
    handle
        .lock()
        .map_err(|_| ProtocolError::Custom(ERR_SESSION_LOCK.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(4, Duration::from_secs(60), 8)
    }

    #[test]
    fn test_open_then_charge_to_exhaustion() {
        let registry = registry();
        let id = registry.open(2).expect("open");
        let handle = registry.get(&id).expect("get");

        let mut record = lock_session(&handle).expect("lock");
        assert_eq!(record.state, SessionState::Created);
        record.charge();
        assert_eq!(record.state, SessionState::Active);
        record.charge();
        assert_eq!(record.state, SessionState::Exhausted);
        assert!(matches!(
            record.ensure_available(),
            Err(ProtocolError::BudgetExceeded { budget: 2 })
        ));
        assert_eq!(record.remaining(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let registry = registry();
        for _ in 0..4 {
            registry.open(1).expect("open");
        }
        assert!(matches!(
            registry.open(1),
            Err(ProtocolError::TooManySessions(4))
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_frees_slot() {
        let registry = registry();
        let id = registry.open(3).expect("open");
        assert!(registry.close(&id).expect("close"));
        assert!(!registry.close(&id).expect("second close"));
        assert!(matches!(
            registry.get(&id),
            Err(ProtocolError::SessionNotFound(_))
        ));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_held_handle_sees_closed() {
        let registry = registry();
        let id = registry.open(3).expect("open");
        let handle = registry.get(&id).expect("get");
        registry.close(&id).expect("close");

        let record = lock_session(&handle).expect("lock");
        assert!(matches!(
            record.ensure_available(),
            Err(ProtocolError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_expired_sessions_are_forgotten() {
        let registry = SessionRegistry::new(4, Duration::from_millis(10), 8);
        let id = registry.open(3).expect("open");
        std::thread::sleep(Duration::from_millis(30));

        assert!(matches!(
            registry.get(&id),
            Err(ProtocolError::SessionNotFound(_))
        ));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let registry = SessionRegistry::new(4, Duration::from_millis(10), 8);
        registry.open(1).expect("open");
        registry.open(1).expect("open");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.purge_expired().expect("purge"), 2);
    }
}
