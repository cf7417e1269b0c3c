//! Redis backing store

use async_trait::async_trait;
use ::redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::debug;

use crate::cache::SetOptions;
use crate::error::CacheError;
use crate::store::CacheStore;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;

/// Connection settings for a [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server host. Empty values fall back to `127.0.0.1`.
    pub host: String,
    /// Server TCP port, default 6379.
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl RedisConfig {
    /// Build settings from `REDIS_HOST` / `REDIS_PORT` environment
    /// variables, falling back to defaults for anything absent or
    /// unparsable.
    pub fn from_env() -> Self {
        let host = std::env::var("REDIS_HOST").unwrap_or_default();
        let port = std::env::var("REDIS_PORT")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self { host, port }
    }

    /// The connection URL for these settings.
    pub fn url(&self) -> String {
        let host = self.host.trim();
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        format!("redis://{}:{}/", host, self.port)
    }
}

/// A Redis-backed store.
///
/// Each operation opens a fresh connection and drops it afterwards;
/// there is no pooling. `ttl` maps to `SET ... EX` and storing "no
/// value" issues a `DEL`.
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub fn new(config: RedisConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.url())?;
        Ok(Self { client })
    }

    pub fn from_env() -> Result<Self, CacheError> {
        Self::new(RedisConfig::from_env())
    }

    async fn connect(&self) -> Result<MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn retrieve(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connect().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn store(
        &self,
        key: &str,
        value: Option<String>,
        options: &SetOptions,
    ) -> Result<(), CacheError> {
        let mut conn = self.connect().await?;

        match value {
            None => {
                debug!(key = %key, "deleting redis entry");
                let _: () = conn.del(key).await?;
            }
            Some(value) => match options.ttl {
                Some(ttl) => {
                    let _: () = conn.set_ex(key, value, ttl).await?;
                }
                None => {
                    let _: () = conn.set(key, value).await?;
                }
            },
        }

        Ok(())
    }
}
