//! Session collaborator.
//!
//! The pipeline only needs `get` and `update`. Storage format and CRUD
//! belong to whatever sits behind the trait; `InMemorySessionStore` keeps
//! sessions in a mutex-guarded map for the CLI and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::models::Session;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal lock error")]
    LockPoisoned,
}

pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Replace a stored session. Unknown ids are an error.
    fn update(&self, session: Session) -> Result<(), StoreError>;
}

// ═══════════════════════════════════════════════════════════
// InMemorySessionStore
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// New empty session with a fresh id.
    pub fn create(&self) -> Result<Session, StoreError> {
        let session = Session::new(Uuid::new_v4().to_string());
        self.insert(session.clone())?;
        Ok(session)
    }

    /// Insert or overwrite.
    pub fn insert(&self, session: Session) -> Result<(), StoreError> {
        tracing::debug!(session_id = %session.id, "Session stored");
        self.lock()?.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(session_id).is_some())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Session>>, StoreError> {
        self.sessions.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.get(session_id).cloned())
    }

    fn update(&self, mut session: Session) -> Result<(), StoreError> {
        let mut sessions = self.lock()?;
        let Some(slot) = sessions.get_mut(&session.id) else {
            return Err(StoreError::NotFound(session.id));
        };
        session.touch();
        *slot = session;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestRecord;

    #[test]
    fn create_then_get() {
        let store = InMemorySessionStore::new();
        let session = store.create().unwrap();
        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.objection_preset_id, "default");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_unknown_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nope").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn update_replaces_and_touches() {
        let store = InMemorySessionStore::new();
        let mut session = store.create().unwrap();
        let before = session.updated_at;
        session.records.push(RequestRecord::new(1, "1", "All leases."));
        store.update(session.clone()).unwrap();

        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert!(loaded.updated_at >= before);
    }

    #[test]
    fn update_unknown_fails() {
        let store = InMemorySessionStore::new();
        let err = store.update(Session::new("ghost")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn remove_session() {
        let store = InMemorySessionStore::new();
        let session = store.create().unwrap();
        assert!(store.remove(&session.id).unwrap());
        assert!(!store.remove(&session.id).unwrap());
    }
}
