//! `Dragonfly` (Redis-compatible) implementation of [`KeyValueStore`].

use fred::prelude::*;
use fred::types::Expiration;

use crate::error::CacheError;
use crate::store::KeyValueStore;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl std::fmt::Debug for DragonflyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragonflyPool")
            .field("connected", &self.client.is_connected())
            .finish()
    }
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the URL cannot be parsed.
    /// Returns [`CacheError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let config = Config::from_url(url)
            .map_err(|e| CacheError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Whether the client currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Close the connection.
    pub async fn quit(&self) {
        if let Err(err) = self.client.quit().await {
            tracing::debug!(error = %err, "Dragonfly quit failed");
        }
    }
}

impl KeyValueStore for DragonflyPool {
    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError> {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let _: () = self
            .client
            .set(key, value, Some(Expiration::EX(ttl)), None, false)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _: u32 = self.client.del(key).await?;
        Ok(())
    }
}
