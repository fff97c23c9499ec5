//! JSON file cursor store.
//!
//! Stores the committed tick cursor as `cursor.json` in a state directory.
//! A commit writes `cursor.json.tmp` and renames it over the old file, so
//! readers only ever see a complete cursor.

use super::{CursorStore, Result, StorageError};
use std::path::{Path, PathBuf};
use tickwise_core::TickCursor;
use tokio::fs;
use tracing::debug;

const CURSOR_FILE: &str = "cursor.json";

/// File-based JSON cursor store.
pub struct JsonCursorStore {
    root: PathBuf,
}

impl JsonCursorStore {
    /// Create the store, creating the state directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        Ok(Self { root })
    }

    fn cursor_path(&self) -> PathBuf {
        self.root.join(CURSOR_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{CURSOR_FILE}.tmp"))
    }
}

#[async_trait::async_trait]
impl CursorStore for JsonCursorStore {
    async fn load(&self) -> Result<Option<TickCursor>> {
        match fs::read(self.cursor_path()).await {
            Ok(bytes) => {
                let cursor = TickCursor::from_bytes(&bytes)
                    .map_err(|e| StorageError::Other(e.to_string()))?;
                Ok(Some(cursor))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&mut self, cursor: &TickCursor) -> Result<()> {
        let bytes = cursor
            .to_bytes()
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let temp = self.temp_path();
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, self.cursor_path()).await?;

        debug!(
            "Committed cursor {} ({} entities)",
            cursor.evaluation_id,
            cursor.entities.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_before_first_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCursorStore::new(dir.path().join("state")).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_replaces_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonCursorStore::new(dir.path()).await.unwrap();

        for id in 1..=2 {
            let cursor = TickCursor {
                evaluation_id: id,
                evaluation_time: Some("2024-01-02T00:00:00Z".parse().unwrap()),
                ..Default::default()
            };
            store.commit(&cursor).await.unwrap();
        }

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.evaluation_id, 2);
        assert!(!dir.path().join("cursor.json.tmp").exists());

        // A fresh handle sees the same committed state.
        let reopened = JsonCursorStore::new(dir.path()).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(loaded));
    }

    #[tokio::test]
    async fn test_corrupt_cursor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cursor.json"), b"{not json").unwrap();
        let store = JsonCursorStore::new(dir.path()).await.unwrap();
        assert!(store.load().await.is_err());
    }
}
