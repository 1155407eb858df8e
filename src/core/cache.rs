//! Caching of pretrained base encoders.
//!
//! A base encoder is loaded once per (options, device) key and kept behind an
//! `Arc` as read-only weights. Trials never train the cached instance: they
//! call [`SentenceEncoder::fork`](crate::pipelines::setfit_pipeline::SentenceEncoder::fork) to get
//! private parameter storage first.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Trait implemented by model option types to generate a stable cache key.
pub trait ModelOptions {
    fn cache_key(&self) -> String;
}

type CacheStorage = HashMap<(TypeId, String), Arc<dyn Any + Send + Sync>>;

/// A thread-safe cache of loaded base models.
pub struct ModelCache {
    cache: Arc<Mutex<CacheStorage>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the shared base model for `key`, loading it on first use.
    pub async fn get_or_create<M, F>(&self, key: &str, loader: F) -> anyhow::Result<Arc<M>>
    where
        M: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<M>,
    {
        if let Some(model) = self.lookup::<M>(key).await {
            return Ok(model);
        }
        let model = Arc::new(loader()?);
        self.store(key, model.clone()).await;
        Ok(model)
    }

    pub async fn get_or_create_async<M, Fut, F>(&self, key: &str, loader: F) -> anyhow::Result<Arc<M>>
    where
        M: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<M>>,
    {
        if let Some(model) = self.lookup::<M>(key).await {
            return Ok(model);
        }
        let model = Arc::new(loader().await?);
        self.store(key, model.clone()).await;
        Ok(model)
    }

    async fn lookup<M: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<M>> {
        let cache = self.cache.lock().await;
        cache
            .get(&(TypeId::of::<M>(), key.to_string()))
            .and_then(|cached| cached.clone().downcast::<M>().ok())
    }

    async fn store<M: Send + Sync + 'static>(&self, key: &str, model: Arc<M>) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            (TypeId::of::<M>(), key.to_string()),
            model as Arc<dyn Any + Send + Sync>,
        );
    }

    /// Clear all cached models.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_MODEL_CACHE: once_cell::sync::Lazy<ModelCache> =
    once_cell::sync::Lazy::new(ModelCache::new);

/// Process-wide cache used by the model builders.
pub fn global_cache() -> &'static ModelCache {
    &GLOBAL_MODEL_CACHE
}
