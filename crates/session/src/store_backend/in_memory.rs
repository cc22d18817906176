use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::{PersistedSession, StoreEngine, StoreError};

/// In-memory backend. Cloning shares the underlying document, which is
/// what tests use to observe what a session machine persisted.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore(Arc<Mutex<Option<PersistedSession>>>);

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Option<PersistedSession>>, StoreError> {
        self.0.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl StoreEngine for InMemoryStore {
    fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        Ok(self.inner()?.clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        *self.inner()? = Some(session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_shares_state_across_clones() {
        let store = InMemoryStore::new();
        assert!(store.load().expect("load").is_none());

        let observer = store.clone();
        store
            .save(&PersistedSession {
                salt_string: Some("Harbor-v1".into()),
                ..Default::default()
            })
            .expect("save");
        let seen = observer.load().expect("load").expect("present");
        assert_eq!(seen.salt_string.as_deref(), Some("Harbor-v1"));
    }
}
