//! Backing store trait

use async_trait::async_trait;

use crate::cache::SetOptions;
use crate::error::CacheError;

/// Raw storage contract implemented per backing store.
///
/// Keys arrive already normalized (trimmed, lowercased) and values are
/// serialized JSON text. Implementations are free to fail; the
/// [`Cache`](crate::Cache) wrapper absorbs every error into its
/// defaults-based contract.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the serialized value for a key, if present.
    async fn retrieve(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a serialized value for a key.
    ///
    /// `None` means "no value": the store must delete the key rather
    /// than persist an empty entry. Which [`SetOptions`] fields are
    /// honored is store-specific.
    async fn store(
        &self,
        key: &str,
        value: Option<String>,
        options: &SetOptions,
    ) -> Result<(), CacheError>;
}
