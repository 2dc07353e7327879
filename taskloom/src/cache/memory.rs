//! In-memory cache-and-topics twin.
//!
//! Backs tests and single-process deployments with the same contract as the
//! remote service: keyed values with TTLs and sequenced per-topic logs,
//! including injectable discontinuities for gap-handling tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use super::{CacheService, CacheValue, SetOptions, TopicBatch, TopicItem, DEFAULT_TTL_SECONDS};
use crate::errors::ServerResult;

struct Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct TopicLog {
    next_sequence: u64,
    messages: Vec<(u64, String)>,
    pending_discontinuity: Option<(u64, u64)>,
}

/// In-memory implementation of [`CacheService`].
#[derive(Default)]
pub struct InMemoryCacheService {
    entries: RwLock<HashMap<String, Entry>>,
    topics: RwLock<HashMap<String, TopicLog>>,
}

impl InMemoryCacheService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a broker-side gap: the next subscribe on `topic` reports a
    /// discontinuity jumping to `new_sequence` on `new_page`, and the
    /// messages in between become irrecoverable.
    pub async fn inject_discontinuity(&self, topic: &str, new_sequence: u64, new_page: u64) {
        let mut topics = self.topics.write().await;
        let log = topics.entry(topic.to_string()).or_default();
        log.pending_discontinuity = Some((new_sequence, new_page));
        log.next_sequence = new_sequence + 1;
    }
}

#[async_trait]
impl CacheService for InMemoryCacheService {
    async fn get_bytes(&self, key: &str) -> ServerResult<Option<Vec<u8>>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: CacheValue, options: SetOptions) -> ServerResult<()> {
        let (bytes, _) = value.into_body()?;
        let ttl = Duration::from_secs(options.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS));
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                bytes,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> ServerResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn topic_publish(&self, topic: &str, payload: &str) -> ServerResult<()> {
        let mut topics = self.topics.write().await;
        let log = topics.entry(topic.to_string()).or_default();
        let sequence = log.next_sequence;
        log.next_sequence += 1;
        log.messages.push((sequence, payload.to_string()));
        Ok(())
    }

    async fn topic_subscribe(
        &self,
        topic: &str,
        sequence: u64,
        _page: u64,
    ) -> ServerResult<TopicBatch> {
        let mut topics = self.topics.write().await;
        let Some(log) = topics.get_mut(topic) else {
            return Ok(TopicBatch::default());
        };

        let mut items: Vec<TopicItem> = log
            .messages
            .iter()
            .filter(|(seq, _)| *seq >= sequence)
            .map(|(seq, payload)| TopicItem::Message {
                sequence: *seq,
                payload: payload.clone(),
            })
            .collect();

        if let Some((new_sequence, new_page)) = log.pending_discontinuity.take() {
            items.push(TopicItem::Discontinuity {
                new_sequence,
                new_page,
            });
        }

        Ok(TopicBatch { items })
    }

    async fn is_valid_connection(&self) -> bool {
        true
    }
}
