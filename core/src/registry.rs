//! Process-wide session registry. The map itself needs only a short-lived
//! lock for membership changes; each session carries its own async mutex so
//! operations on one session serialize while different sessions proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::SessionEngine;
use crate::error::EngineError;
use crate::error::Result;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<SessionEngine>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly started engine and return its id.
    pub async fn insert(&self, engine: SessionEngine) -> Uuid {
        let id = engine.id();
        self.sessions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(engine)));
        id
    }

    /// Look up a session. Callers lock the returned handle for the duration
    /// of one operation, which is what serializes per-session work.
    pub async fn get(&self, id: Uuid) -> Result<Arc<Mutex<SessionEngine>>> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownSession(id))
    }

    /// Remove a session. An operation already holding the session's lock
    /// finishes undisturbed; removal only prevents new lookups.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.sessions
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::UnknownSession(id))
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_ids_fail_before_any_work() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let err = registry.get(id).await.expect_err("must fail");
        assert_eq!(err.code(), "UnknownSession");
        let err = registry.remove(id).await.expect_err("must fail");
        assert_eq!(err.code(), "UnknownSession");
    }
}
