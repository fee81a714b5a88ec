//! Key-value storage that survives the redirect between the two legs of a flow.

mod encryption;
mod file;
mod memory;

pub use encryption::{decrypt, encrypt};
pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Error;

/// Durable key-value storage visible after a full page reload or process restart.
///
/// Writes are last-writer-wins per key. Implementations must be internally
/// synchronized so that concurrent writers to different keys never corrupt
/// each other's entries.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// All keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Read and remove `key` in one step.
    ///
    /// The default implementation is a read followed by a delete; stores that can
    /// do better should override it so two callers can never both observe the value.
    async fn take(&self, key: &str) -> Result<Option<String>, Error> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }
}
