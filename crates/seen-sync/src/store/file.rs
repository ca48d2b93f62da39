//! Directory-backed store: one file per key.
//!
//! File names are the lowercase hex encoding of the key bytes, so any user
//! name (slashes, dots, unicode) maps to a single flat file. Writes go to a
//! uniquely named temp file first, synced, and renamed into place, so a
//! reader sees either the old value or the new one, never a partial write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{SeenStore, StoreError};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::Open {
                path: root.clone(),
                source,
            })?;

        tracing::info!(path = %root.display(), "Opened file store");
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_key(key)))
    }
}

fn encode_key(key: &str) -> String {
    key.bytes().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl SeenStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                key: key.to_string(),
                path,
                source,
            }),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", encode_key(key), Uuid::new_v4()));

        let write_err = |source| StoreError::Write {
            key: key.to_string(),
            path: path.clone(),
            source,
        };

        let result = match write_synced(&tmp, &value).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };

        if let Err(source) = result {
            // The original error is what gets reported.
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(source));
        }
        Ok(())
    }
}

/// Write `contents` to a fresh file and flush it to disk before returning.
async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
