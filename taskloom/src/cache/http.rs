//! HTTP adapter for the remote cache-and-topics service.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use super::{CacheService, CacheValue, SetOptions, TopicBatch, TopicItem, DEFAULT_TTL_SECONDS};
use crate::errors::{ServerError, ServerResult};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const PROBE_KEY: &str = "connection-probe";

/// Client for the remote cache service: keyed values with TTLs under
/// `/cache/{key}`, sequenced topics under `/topics/{topic}/messages`.
#[derive(Clone)]
pub struct HttpCacheService {
    client: Client,
    base_url: String,
}

impl HttpCacheService {
    /// Create an adapter for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create an adapter with a pre-configured `reqwest::Client` (timeouts,
    /// proxies, default headers).
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/cache/{}", self.base_url, key)
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}/messages", self.base_url, topic)
    }

    /// Issue a request, retrying transient failures (network errors, 5xx)
    /// with exponential backoff. 4xx responses are returned to the caller
    /// untouched.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> ServerResult<reqwest::Response> {
        let mut backoff = BACKOFF_BASE;
        let mut retries = 0;
        loop {
            let err = match build().send().await {
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    ServerError::CacheStatus { status, body }
                }
                Ok(response) => return Ok(response),
                Err(err) => ServerError::from(err),
            };

            if !err.is_transient() || retries >= MAX_RETRIES {
                return Err(err);
            }
            retries += 1;
            warn!(retries, error = %err, "cache request failed, retrying");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    async fn status_error(response: reqwest::Response) -> ServerError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ServerError::CacheStatus { status, body }
    }
}

#[async_trait]
impl CacheService for HttpCacheService {
    async fn get_bytes(&self, key: &str) -> ServerResult<Option<Vec<u8>>> {
        let url = self.value_url(key);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            _ => Err(Self::status_error(response).await),
        }
    }

    async fn set(&self, key: &str, value: CacheValue, options: SetOptions) -> ServerResult<()> {
        let (body, default_content_type) = value.into_body()?;
        let content_type = options
            .content_type
            .unwrap_or_else(|| default_content_type.to_string());
        let body = if options.base64 {
            base64::engine::general_purpose::STANDARD
                .encode(&body)
                .into_bytes()
        } else {
            body
        };
        let ttl = options.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);

        let url = self.value_url(key);
        let response = self
            .send_with_retry(|| {
                let mut request = self
                    .client
                    .put(&url)
                    .query(&[("ttl", ttl)])
                    .header("Content-Type", &content_type)
                    .body(body.clone());
                if options.base64 {
                    request = request.header("X-Content-Encoding", "base64");
                }
                request
            })
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response).await)
        }
    }

    async fn delete(&self, key: &str) -> ServerResult<()> {
        let url = self.value_url(key);
        let response = self.send_with_retry(|| self.client.delete(&url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(Self::status_error(response).await),
        }
    }

    async fn topic_publish(&self, topic: &str, payload: &str) -> ServerResult<()> {
        let url = self.topic_url(topic);
        let body = payload.to_string();
        let response = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .body(body.clone())
            })
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response).await)
        }
    }

    async fn topic_subscribe(
        &self,
        topic: &str,
        sequence: u64,
        page: u64,
    ) -> ServerResult<TopicBatch> {
        let url = self.topic_url(topic);
        let response = self
            .send_with_retry(|| {
                self.client
                    .get(&url)
                    .query(&[("sequence_number", sequence), ("sequence_page", page)])
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        let page: TopicPage = response.json().await?;
        Ok(TopicBatch {
            items: page.items.into_iter().map(TopicItem::from).collect(),
        })
    }

    async fn is_valid_connection(&self) -> bool {
        match self.get_bytes(PROBE_KEY).await {
            Ok(_) => true,
            Err(ServerError::CacheStatus { body, .. }) => !body.contains("cache not found"),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopicPage {
    #[serde(default)]
    items: Vec<TopicPageItem>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TopicPageItem {
    Discontinuity { discontinuity: DiscontinuityBody },
    Message {
        topic_sequence_number: u64,
        payload: String,
    },
}

#[derive(Debug, Deserialize)]
struct DiscontinuityBody {
    new_topic_sequence: u64,
    new_sequence_page: u64,
}

impl From<TopicPageItem> for TopicItem {
    fn from(item: TopicPageItem) -> Self {
        match item {
            TopicPageItem::Message {
                topic_sequence_number,
                payload,
            } => TopicItem::Message {
                sequence: topic_sequence_number,
                payload,
            },
            TopicPageItem::Discontinuity { discontinuity } => TopicItem::Discontinuity {
                new_sequence: discontinuity.new_topic_sequence,
                new_page: discontinuity.new_sequence_page,
            },
        }
    }
}
