//! Shared agent-card registry.
//!
//! Instances advertise themselves by writing their full card under
//! `agent:{url}` and a one-line summary into the `agent:list` array, both
//! with a one-day TTL so stale agents age out.

use std::sync::Arc;

use taskloom_types::{AgentCard, AgentSummary};

use crate::cache::{CacheService, CacheValue, SetOptions};
use crate::errors::ServerResult;

/// Key of the shared agent listing.
pub const AGENT_LIST_KEY: &str = "agent:list";

/// TTL applied to registry entries.
pub const REGISTRY_TTL_SECONDS: u64 = 86_400;

/// Registry of agent cards in the shared cache.
pub struct AgentCardRegistry {
    cache: Arc<dyn CacheService>,
}

impl AgentCardRegistry {
    pub fn new(cache: Arc<dyn CacheService>) -> Self {
        Self { cache }
    }

    fn card_key(url: &str) -> String {
        format!("agent:{url}")
    }

    /// Publish a card: the full card under its URL key and a refreshed entry
    /// in the summary list.
    pub async fn register(&self, card: &AgentCard) -> ServerResult<()> {
        self.cache
            .set(
                &Self::card_key(&card.url),
                CacheValue::Json(serde_json::to_value(card)?),
                SetOptions::ttl(REGISTRY_TTL_SECONDS),
            )
            .await?;

        let mut summaries = self.list().await?;
        summaries.retain(|summary| summary.url != card.url);
        summaries.push(card.summary());
        self.cache
            .set(
                AGENT_LIST_KEY,
                CacheValue::Json(serde_json::to_value(&summaries)?),
                SetOptions::ttl(REGISTRY_TTL_SECONDS),
            )
            .await
    }

    /// All currently listed agents.
    pub async fn list(&self) -> ServerResult<Vec<AgentSummary>> {
        match self.cache.get_json(AGENT_LIST_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// The full card registered for a URL, if any.
    pub async fn lookup(&self, url: &str) -> ServerResult<Option<AgentCard>> {
        match self.cache.get_json(&Self::card_key(url)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheService;

    fn registry() -> AgentCardRegistry {
        AgentCardRegistry::new(Arc::new(InMemoryCacheService::new()))
    }

    fn card(name: &str, url: &str) -> AgentCard {
        AgentCard::new(name, format!("{name} agent"), "1.0.0", url)
    }

    #[tokio::test]
    async fn register_lists_and_resolves_cards() {
        let registry = registry();
        registry
            .register(&card("echo", "http://echo.local"))
            .await
            .unwrap();
        registry
            .register(&card("sum", "http://sum.local"))
            .await
            .unwrap();

        let listed = registry.list().await.unwrap();
        assert_eq!(listed.len(), 2);

        let resolved = registry.lookup("http://echo.local").await.unwrap().unwrap();
        assert_eq!(resolved.name, "echo");
        assert!(registry.lookup("http://missing.local").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reregistering_replaces_the_summary() {
        let registry = registry();
        registry
            .register(&card("echo", "http://echo.local"))
            .await
            .unwrap();
        registry
            .register(&card("echo-v2", "http://echo.local"))
            .await
            .unwrap();

        let listed = registry.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "echo-v2");
    }
}
