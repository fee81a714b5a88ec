//! File-backed store so PKCE parameters survive a process restart between legs.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{encryption, KeyValueStore};
use crate::error::{Error, ErrorKind, StorageErrorKind};

const ENTRY_EXTENSION: &str = "entry";

/// `KeyValueStore` persisted as one file per key inside a directory.
///
/// Each write lands in a uniquely named temp file that is then renamed over the
/// key's file, so writers to different keys never touch each other's data and
/// writers to the same key are last-writer-wins, even across processes.
/// `take` claims the key's file with a rename, so exactly one caller gets it.
///
/// When an encryption key is configured, values are AES-256-GCM encrypted
/// before they touch the disk.
pub struct FileStore {
    dir: PathBuf,
    encryption_key: Option<String>,
}

impl FileStore {
    /// Create a store in directory `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            encryption_key: None,
        }
    }

    /// Encrypt values with the given hex-encoded 32-byte key.
    pub fn with_encryption_key(mut self, key_hex: String) -> Self {
        self.encryption_key = Some(key_hex);
        self
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Keys are hex encoded so any key maps to a portable file name.
    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(key), ENTRY_EXTENSION))
    }

    /// Dot-prefixed and without the entry extension, so `keys` never lists it.
    fn scratch_path(&self, key: &str, suffix: &str) -> PathBuf {
        self.dir
            .join(format!(".{}.{}.{}", hex::encode(key), Uuid::new_v4(), suffix))
    }

    fn key_of(file_name: &str) -> Option<String> {
        let encoded = file_name.strip_suffix(ENTRY_EXTENSION)?.strip_suffix('.')?;
        if encoded.starts_with('.') {
            return None;
        }
        String::from_utf8(hex::decode(encoded).ok()?).ok()
    }

    async fn read_entry(path: &Path) -> Result<Option<String>, Error> {
        match tokio::fs::read_to_string(path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn seal(&self, value: &str) -> Result<String, Error> {
        match &self.encryption_key {
            Some(key) => encryption::encrypt(value, key),
            None => Ok(value.to_string()),
        }
    }

    fn open(&self, value: String) -> Result<String, Error> {
        match &self.encryption_key {
            Some(key) => encryption::decrypt(&value, key),
            None => Ok(value),
        }
    }
}

fn unavailable(err: std::io::Error) -> Error {
    Error {
        source: Some(Box::new(err)),
        error_kind: ErrorKind::Storage(StorageErrorKind::Unavailable),
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Self::read_entry(&self.entry_path(key))
            .await?
            .map(|v| self.open(v))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let sealed = self.seal(value)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(unavailable)?;

        let tmp = self.scratch_path(key, "tmp");
        tokio::fs::write(&tmp, sealed).await.map_err(unavailable)?;
        if let Err(e) = tokio::fs::rename(&tmp, self.entry_path(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(unavailable(e));
        }
        debug!("Persisted PKCE store entry {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(unavailable)? {
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(Self::key_of) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, Error> {
        let claimed = self.scratch_path(key, "taken");
        match tokio::fs::rename(self.entry_path(key), &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(e)),
        }

        let value = Self::read_entry(&claimed).await;
        if let Err(e) = tokio::fs::remove_file(&claimed).await {
            warn!("Failed to remove claimed PKCE entry {}: {}", claimed.display(), e);
        }
        value?.map(|v| self.open(v)).transpose()
    }
}
