//! Durable task snapshots over the shared cache.
//!
//! The whole task serializes under its own id. File and data artifact parts
//! are externalized to side keys so the primary record stays small and large
//! blobs stream without rewriting the task; the part keeps a `cacheKey`
//! pointer in its metadata while persisted and is rehydrated on load.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use taskloom_types::{Artifact, FileContent, Metadata, Part, Task};

use crate::cache::{CacheService, CacheValue, SetOptions};

/// Metadata key holding an externalized part's cache pointer.
const CACHE_KEY_FIELD: &str = "cacheKey";

/// Persists and reloads task snapshots. Failures are logged and swallowed:
/// `load` answers `None`, `save` returns normally, and callers treat a
/// missing task as not found.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save(&self, task: &Task, ttl_seconds: Option<u64>);

    async fn load(&self, task_id: &str) -> Option<Task>;
}

/// [`TaskStore`] backed by the shared cache.
pub struct CacheTaskStore {
    cache: Arc<dyn CacheService>,
}

impl CacheTaskStore {
    pub fn new(cache: Arc<dyn CacheService>) -> Self {
        Self { cache }
    }

    async fn externalize_artifact(
        &self,
        task_id: &str,
        artifact: &mut Artifact,
        ttl_seconds: Option<u64>,
    ) {
        let artifact_id = artifact.artifact_id.clone();
        for part in &mut artifact.parts {
            let key = format!("artifact:{}:{}:{}", task_id, artifact_id, Uuid::new_v4());
            let written = match part {
                Part::File {
                    file: FileContent::WithBytes(file),
                    ..
                } if !file.bytes.is_empty() => {
                    let options = SetOptions {
                        ttl_seconds,
                        content_type: file.mime_type.clone(),
                        ..SetOptions::default()
                    };
                    let payload = CacheValue::Text(file.bytes.clone());
                    match self.cache.set(&key, payload, options).await {
                        Ok(()) => {
                            file.bytes.clear();
                            true
                        }
                        Err(err) => {
                            warn!(key = %key, error = %err, "failed to externalize file part, keeping it inline");
                            false
                        }
                    }
                }
                Part::Data { data, .. } if !data.is_null() => {
                    let payload = CacheValue::Text(data.to_string());
                    let options = SetOptions {
                        ttl_seconds,
                        ..SetOptions::default()
                    };
                    match self.cache.set(&key, payload, options).await {
                        Ok(()) => {
                            *data = Value::Null;
                            true
                        }
                        Err(err) => {
                            warn!(key = %key, error = %err, "failed to externalize data part, keeping it inline");
                            false
                        }
                    }
                }
                _ => false,
            };
            if written {
                part.metadata_mut()
                    .get_or_insert_with(Metadata::new)
                    .insert(CACHE_KEY_FIELD.to_string(), Value::String(key));
            }
        }
    }

    async fn rehydrate_artifact(&self, artifact: &mut Artifact) {
        for part in &mut artifact.parts {
            let Some(key) = part
                .metadata()
                .and_then(|m| m.get(CACHE_KEY_FIELD))
                .and_then(|v| v.as_str())
                .map(str::to_string)
            else {
                continue;
            };

            match self.cache.get_string(&key).await {
                Ok(Some(payload)) => match part {
                    Part::File {
                        file: FileContent::WithBytes(file),
                        ..
                    } => file.bytes = payload,
                    Part::Data { data, .. } => match serde_json::from_str(&payload) {
                        Ok(value) => *data = value,
                        Err(err) => {
                            warn!(key = %key, error = %err, "externalized data part is not valid JSON")
                        }
                    },
                    _ => {}
                },
                Ok(None) => warn!(key = %key, "externalized part payload is gone"),
                Err(err) => warn!(key = %key, error = %err, "failed to rehydrate part"),
            }

            // The pointer is a persistence detail; never surface it.
            if let Some(metadata) = part.metadata_mut().as_mut() {
                metadata.remove(CACHE_KEY_FIELD);
            }
            if part.metadata().is_some_and(|m| m.is_empty()) {
                *part.metadata_mut() = None;
            }
        }
    }
}

#[async_trait]
impl TaskStore for CacheTaskStore {
    async fn save(&self, task: &Task, ttl_seconds: Option<u64>) {
        let mut stored = task.clone();
        for artifact in &mut stored.artifacts {
            self.externalize_artifact(&task.id, artifact, ttl_seconds)
                .await;
        }

        let value = match serde_json::to_value(&stored) {
            Ok(value) => value,
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "task did not serialize, not saved");
                return;
            }
        };
        let options = SetOptions {
            ttl_seconds,
            content_type: Some("application/json".to_string()),
            ..SetOptions::default()
        };
        if let Err(err) = self.cache.set(&task.id, CacheValue::Json(value), options).await {
            warn!(task_id = %task.id, error = %err, "task save failed");
        }
    }

    async fn load(&self, task_id: &str) -> Option<Task> {
        let value = match self.cache.get_json(task_id).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "task load failed");
                return None;
            }
        };
        let mut task: Task = match serde_json::from_value(value) {
            Ok(task) => task,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "stored task did not deserialize");
                return None;
            }
        };
        for artifact in &mut task.artifacts {
            self.rehydrate_artifact(artifact).await;
        }
        Some(task)
    }
}
