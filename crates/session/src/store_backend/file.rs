use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::store::{PersistedSession, StoreEngine, StoreError};

/// JSON-file backend. Saves write a sibling temp file and rename it into
/// place, so a crash mid-save never leaves a truncated document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl StoreEngine for FileStore {
    fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(session)?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(serialized.as_bytes())?;
            tmp.write_all(b"\n")?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), "session state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_returns_none_when_file_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("missing.json"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("session.json"));
        let session = PersistedSession {
            salt_string: Some("Harbor-v1".into()),
            network: Some("devnet".into()),
            ..Default::default()
        };
        store.save(&session).expect("save");
        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded.salt_string.as_deref(), Some("Harbor-v1"));
        assert_eq!(loaded.network.as_deref(), Some("devnet"));
    }

    #[test]
    fn save_replaces_previous_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("session.json"));
        let mut session = PersistedSession {
            salt_string: Some("first".into()),
            ..Default::default()
        };
        store.save(&session).expect("first save");
        session.salt_string = Some("second".into());
        store.save(&session).expect("second save");
        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded.salt_string.as_deref(), Some("second"));
    }
}
