use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::trace;

use crate::model::ConfigDocument;
use crate::types::Uuid;
use crate::util::fs::safe_write_all;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Filesystem backed cache of the last-applied configuration
/// document, one JSON blob per device uuid.
///
/// Writes are atomic but there is no cross-process locking; the
/// agent is the single writer by design.
#[derive(Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Store rooted at the platform state directory, e.g.
    /// `~/.local/state/tether` on Linux.
    pub fn default_root() -> Self {
        let dir = if let Some(state_dir) = dirs::state_dir() {
            state_dir
        } else {
            // Fallback to home directory if state dir is not available
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("state")
        };
        Self::new(dir.join(env!("CARGO_PKG_NAME")))
    }

    fn document_path(&self, uuid: &Uuid) -> PathBuf {
        self.root.join(uuid.as_str()).with_extension("json")
    }

    /// Read the cached document for a device. A missing file is not
    /// an error, it just means the device was never provisioned
    /// locally.
    pub async fn read(&self, uuid: &Uuid) -> Result<Option<ConfigDocument>, StoreError> {
        let path = self.document_path(uuid);
        trace!("reading {}", path.display());

        match fs::read_to_string(&path).await {
            Ok(contents) => {
                let doc = serde_json::from_str::<ConfigDocument>(&contents)?;
                Ok(Some(doc))
            }
            Err(err) => match err.kind() {
                io::ErrorKind::NotFound => Ok(None),
                _ => Err(err.into()),
            },
        }
    }

    /// Create or replace the cached document for a device.
    pub async fn write(&self, uuid: &Uuid, doc: &ConfigDocument) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).await?;

        let path = self.document_path(uuid);
        let buf = serde_json::to_vec(doc)?;
        trace!("writing {}", path.display());

        tokio::task::spawn_blocking(move || safe_write_all(path, &buf))
            .await
            .expect("safe_write_all should not panic")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn read_returns_none_for_unknown_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());

        let doc = store.read(&Uuid::from("no-such-device")).await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let uuid = Uuid::from("dev-1");

        let mut doc = ConfigDocument::default();
        doc.version = 7;
        doc.set("networkProperties", json!({ "hostName": "room-14" }));

        store.write(&uuid, &doc).await.unwrap();
        let back = store.read(&uuid).await.unwrap().unwrap();

        assert_eq!(back, doc);
    }

    #[tokio::test]
    async fn corrupt_cache_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let uuid = Uuid::from("dev-1");

        std::fs::write(dir.path().join("dev-1.json"), "not json").unwrap();

        let res = store.read(&uuid).await;
        assert!(matches!(res, Err(StoreError::Serialization(_))));
    }
}
