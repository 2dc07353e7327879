//! Cache/topic adapter: a key-value store with TTLs plus sequenced pub/sub
//! topics, backed by a remote HTTP service or an in-memory twin.

use async_trait::async_trait;

use crate::errors::ServerResult;

mod http;
mod memory;

pub use http::HttpCacheService;
pub use memory::InMemoryCacheService;

/// Default time-to-live applied when a set omits one.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Options for a cache write.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live in seconds; the adapter default applies when unset.
    pub ttl_seconds: Option<u64>,
    /// Content type recorded with the value.
    pub content_type: Option<String>,
    /// Base64-encode the value for transport.
    pub base64: bool,
}

impl SetOptions {
    /// Options carrying only a TTL.
    pub fn ttl(seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(seconds),
            ..Self::default()
        }
    }
}

/// A value to write: strings are sent verbatim, byte buffers raw, and
/// structured values as JSON.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl CacheValue {
    pub(crate) fn into_body(self) -> ServerResult<(Vec<u8>, &'static str)> {
        Ok(match self {
            CacheValue::Bytes(bytes) => (bytes, "application/octet-stream"),
            CacheValue::Text(text) => (text.into_bytes(), "text/plain"),
            CacheValue::Json(value) => (serde_json::to_vec(&value)?, "application/json"),
        })
    }
}

/// One page of messages read from a topic.
#[derive(Debug, Clone, Default)]
pub struct TopicBatch {
    pub items: Vec<TopicItem>,
}

/// A single topic item: a sequenced message, or a discontinuity marker
/// signalling that events between the last seen sequence and `new_sequence`
/// are irrecoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicItem {
    Message { sequence: u64, payload: String },
    Discontinuity { new_sequence: u64, new_page: u64 },
}

/// The cache-and-topics service every instance shares. Transient failures are
/// retried inside the implementation where that makes sense; persistent
/// failures surface as errors.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Fetch a raw value. Missing keys are `Ok(None)`, not errors.
    async fn get_bytes(&self, key: &str) -> ServerResult<Option<Vec<u8>>>;

    /// Fetch a value as UTF-8 text.
    async fn get_string(&self, key: &str) -> ServerResult<Option<String>> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    /// Fetch a value parsed as JSON.
    async fn get_json(&self, key: &str) -> ServerResult<Option<serde_json::Value>> {
        match self.get_string(key).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Write a value under a key.
    async fn set(&self, key: &str, value: CacheValue, options: SetOptions) -> ServerResult<()>;

    /// Remove a key. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> ServerResult<()>;

    /// Append a payload to a topic.
    async fn topic_publish(&self, topic: &str, payload: &str) -> ServerResult<()>;

    /// Read messages from a topic starting at the given sequence and page.
    async fn topic_subscribe(
        &self,
        topic: &str,
        sequence: u64,
        page: u64,
    ) -> ServerResult<TopicBatch>;

    /// Probe the backing service with a sentinel-key lookup. Only a response
    /// naming a missing cache invalidates the connection.
    async fn is_valid_connection(&self) -> bool;
}
