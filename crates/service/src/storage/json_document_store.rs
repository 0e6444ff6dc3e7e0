use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs, sync::RwLock};
use tracing::debug;

use crate::errors::StoreError;

/// A whole JSON document kept in memory and rewritten to disk on every change.
///
/// Without a path the document lives in memory only, which is what tests use.
pub struct JsonDocumentStore<T> {
    inner: RwLock<T>,
    file_path: Option<PathBuf>,
}

impl<T> JsonDocumentStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    pub fn in_memory() -> Self {
        Self { inner: RwLock::new(T::default()), file_path: None }
    }

    /// Load the document at `path`, or create the file with an empty document.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let file_path = path.into();
        common::env::ensure_parent_dir(&file_path).await.map_err(|e| StoreError::Io(e.to_string()))?;

        let doc = match read_document(&file_path).await? {
            Some(doc) => doc,
            None => {
                let empty = T::default();
                write_document(&file_path, &empty).await?;
                empty
            }
        };
        Ok(Self { inner: RwLock::new(doc), file_path: Some(file_path) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let doc = self.inner.read().await;
        f(&doc)
    }

    /// Apply `f` to a copy of the document, persist the copy, then publish it.
    /// When `f` or the write fails the in-memory document is left untouched.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let mut doc = self.inner.write().await;
        let mut next = doc.clone();
        let ret = f(&mut next)?;
        if let Some(path) = &self.file_path {
            write_document(path, &next).await?;
        }
        *doc = next;
        Ok(ret)
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.file_path else { return Ok(()) };
        let doc = self.inner.read().await;
        write_document(path, &*doc).await
    }

    /// Replace the in-memory document with the file's content; a missing file
    /// leaves the document as is.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let Some(path) = &self.file_path else { return Ok(()) };
        if let Some(loaded) = read_document::<T>(path).await? {
            *self.inner.write().await = loaded;
        }
        Ok(())
    }
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(format!("read {}: {e}", path.display()))),
    }
}

async fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(doc)?;
    // write beside the target and rename so a crash never leaves half a document
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &data).await.map_err(|e| StoreError::Io(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).await.map_err(|e| StoreError::Io(format!("rename {}: {e}", path.display())))?;
    debug!(path = %path.display(), bytes = data.len(), "state_file_written");
    Ok(())
}
