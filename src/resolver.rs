use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::PipelineError;
use crate::storage::Storage;
use crate::types::Source;

/// Maps an inbound lookup key to its active [`Source`].
///
/// Keys are opaque secrets compared by exact equality. Resolved sources may be
/// cached; callers that deactivate or edit a source must invalidate it here.
pub struct SourceResolver {
    storage: Arc<dyn Storage>,
    cache: Option<RwLock<HashMap<String, Source>>>,
}

impl SourceResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, cache: None }
    }

    pub fn with_cache(mut self) -> Self {
        self.cache = Some(RwLock::new(HashMap::new()));
        self
    }

    pub async fn resolve(&self, lookup_key: &str) -> Result<Source, PipelineError> {
        if let Some(cache) = &self.cache {
            if let Some(source) = cache.read().await.get(lookup_key) {
                return Ok(source.clone());
            }
        }

        let source = self
            .storage
            .find_active_source_by_key(lookup_key)
            .await?
            .filter(|s| s.active && s.lookup_key == lookup_key);

        let Some(source) = source else {
            tracing::info!("no active source for lookup key");
            return Err(PipelineError::SourceNotFound);
        };

        if let Some(cache) = &self.cache {
            cache.write().await.insert(lookup_key.to_string(), source.clone());
        }
        tracing::debug!(source_id = %source.id, kind = %source.kind, "source resolved");
        Ok(source)
    }

    pub async fn invalidate(&self, lookup_key: &str) {
        if let Some(cache) = &self.cache {
            cache.write().await.remove(lookup_key);
        }
    }

    pub async fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.write().await.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::SourceKind;

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert_source(Source::new("s1", SourceKind::Gitlab, "abc123", "u1")).await;
        let resolver = SourceResolver::new(storage);

        assert!(matches!(resolver.resolve("abc").await, Err(PipelineError::SourceNotFound)));
        assert!(matches!(resolver.resolve("abc1234").await, Err(PipelineError::SourceNotFound)));
        assert_eq!(resolver.resolve("abc123").await.unwrap().kind, SourceKind::Gitlab);
    }

    #[tokio::test]
    async fn cached_source_survives_until_invalidated() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert_source(Source::new("s1", SourceKind::Generic, "k", "u1")).await;
        let resolver = SourceResolver::new(storage.clone()).with_cache();
        resolver.resolve("k").await.unwrap();

        storage
            .insert_source(Source::new("s1", SourceKind::Generic, "k", "u1").with_active(false))
            .await;
        assert!(resolver.resolve("k").await.is_ok());

        resolver.invalidate("k").await;
        assert!(matches!(resolver.resolve("k").await, Err(PipelineError::SourceNotFound)));
    }
}
