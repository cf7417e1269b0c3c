//! Cache client wrapper

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use tally_core::strings;

use crate::store::CacheStore;

/// Options for [`Cache::set`].
///
/// Recognized fields are store-specific; stores ignore what they do
/// not support.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Entry lifetime in seconds. Only honored by stores with expiry
    /// support (Redis); `None` means no expiry.
    pub ttl: Option<u64>,
}

impl SetOptions {
    pub fn with_ttl(seconds: u64) -> Self {
        Self { ttl: Some(seconds) }
    }
}

/// A cache client over a replaceable backing store.
///
/// Keys are normalized (trimmed, lowercased) before every operation,
/// so `"Foo "`, `"foo"` and `"FOO"` address the same entry. Values
/// round-trip through JSON text. No operation on this type fails:
/// `get` falls back to the caller's default and `set`/`remove` report
/// success as a boolean.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: impl CacheStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Try to read a value, returning `default` when the key is
    /// absent, the store fails, or the stored text does not
    /// deserialize into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>, default: T) -> T {
        let key = strings::normalize(key.as_ref());

        match self.store.retrieve(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or(default),
            Ok(None) => default,
            Err(err) => {
                debug!(key = %key, error = %err, "cache get failed, using default");
                default
            }
        }
    }

    /// Store a value. Returns whether the operation succeeded;
    /// failures are absorbed, never raised.
    pub async fn set<T: Serialize>(
        &self,
        key: impl AsRef<str>,
        value: &T,
        options: &SetOptions,
    ) -> bool {
        let key = strings::normalize(key.as_ref());

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(key = %key, error = %err, "cache set failed to serialize value");
                return false;
            }
        };

        match self.store.store(&key, Some(raw), options).await {
            Ok(()) => true,
            Err(err) => {
                debug!(key = %key, error = %err, "cache set failed");
                false
            }
        }
    }

    /// Remove a key by storing "no value". Returns whether the
    /// operation succeeded.
    pub async fn remove(&self, key: impl AsRef<str>) -> bool {
        let key = strings::normalize(key.as_ref());

        match self.store.store(&key, None, &SetOptions::default()).await {
            Ok(()) => true,
            Err(err) => {
                debug!(key = %key, error = %err, "cache remove failed");
                false
            }
        }
    }
}
