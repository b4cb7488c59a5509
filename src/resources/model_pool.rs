//! Owned lifecycle for the cached heavyweight model. The monitor's
//! emergency reclamation can invalidate the cache while a job is mid-flight;
//! pipelines re-acquire before every use and transparently reload.

use crate::ports::transcriber::{Transcriber, TranscriberFactory};
use crate::ports::BoxError;
use crate::resources::monitor::Reclaimable;
use crate::resources::policy::ModelTier;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

struct CachedModel {
    tier: ModelTier,
    handle: Arc<dyn Transcriber>,
}

pub struct ModelPool {
    factory: Arc<dyn TranscriberFactory>,
    /// Drop the cache after each job (constrained deployments)
    unload_after_use: bool,
    slot: Mutex<Option<CachedModel>>,
}

impl ModelPool {
    pub fn new(factory: Arc<dyn TranscriberFactory>, unload_after_use: bool) -> Self {
        Self {
            factory,
            unload_after_use,
            slot: Mutex::new(None),
        }
    }

    /// Shared handle for the tier, loading through the factory when the
    /// cache is empty, holds a different tier, or was invalidated.
    pub async fn acquire(&self, tier: ModelTier) -> Result<Arc<dyn Transcriber>, BoxError> {
        if let Some(cached) = self.cached_handle(tier) {
            return Ok(cached);
        }

        info!(tier = tier.name(), "loading transcription model");
        let handle = self.factory.load(tier).await?;

        let mut slot = self.slot.lock().expect("model slot poisoned");
        *slot = Some(CachedModel {
            tier,
            handle: Arc::clone(&handle),
        });
        Ok(handle)
    }

    /// A fresh, uncached instance for an intra-job parallel task. Isolated
    /// handles avoid shared-mutable-state races on the model.
    pub async fn load_isolated(&self, tier: ModelTier) -> Result<Arc<dyn Transcriber>, BoxError> {
        self.factory.load(tier).await
    }

    /// Called by job owners when they are done with the model.
    pub fn release(&self) {
        if self.unload_after_use {
            self.invalidate();
        }
    }

    /// Drop the cached model. In-flight holders keep their `Arc` until they
    /// finish the current call; the next `acquire` reloads.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().expect("model slot poisoned");
        if let Some(cached) = slot.take() {
            info!(tier = cached.tier.name(), "unloaded cached model");
        }
    }

    pub fn cached_tier(&self) -> Option<ModelTier> {
        self.slot
            .lock()
            .expect("model slot poisoned")
            .as_ref()
            .map(|c| c.tier)
    }

    fn cached_handle(&self, tier: ModelTier) -> Option<Arc<dyn Transcriber>> {
        let slot = self.slot.lock().expect("model slot poisoned");
        slot.as_ref()
            .filter(|c| c.tier == tier)
            .map(|c| Arc::clone(&c.handle))
    }
}

impl Reclaimable for ModelPool {
    fn reclaim(&self) {
        warn!("emergency reclamation: dropping cached model");
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subtitles::RawSegment;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopModel;

    #[async_trait]
    impl Transcriber for NoopModel {
        async fn transcribe(
            &self,
            _media: &Path,
            _language: &str,
        ) -> Result<Vec<RawSegment>, BoxError> {
            Ok(Vec::new())
        }
    }

    struct CountingFactory {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl TranscriberFactory for CountingFactory {
        async fn load(&self, _tier: ModelTier) -> Result<Arc<dyn Transcriber>, BoxError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NoopModel))
        }
    }

    fn pool(unload_after_use: bool) -> (Arc<CountingFactory>, ModelPool) {
        let factory = Arc::new(CountingFactory {
            loads: AtomicUsize::new(0),
        });
        let pool = ModelPool::new(factory.clone(), unload_after_use);
        (factory, pool)
    }

    #[tokio::test]
    async fn acquire_reuses_cached_tier() {
        let (factory, pool) = pool(false);
        pool.acquire(ModelTier::Tiny).await.unwrap();
        pool.acquire(ModelTier::Tiny).await.unwrap();
        assert_eq!(factory.loads.load(Ordering::SeqCst), 1);
        assert_eq!(pool.cached_tier(), Some(ModelTier::Tiny));
    }

    #[tokio::test]
    async fn tier_change_reloads() {
        let (factory, pool) = pool(false);
        pool.acquire(ModelTier::Tiny).await.unwrap();
        pool.acquire(ModelTier::Base).await.unwrap();
        assert_eq!(factory.loads.load(Ordering::SeqCst), 2);
        assert_eq!(pool.cached_tier(), Some(ModelTier::Base));
    }

    #[tokio::test]
    async fn invalidation_forces_transparent_reload() {
        let (factory, pool) = pool(false);
        pool.acquire(ModelTier::Tiny).await.unwrap();

        // The monitor yanks the model mid-flight.
        pool.reclaim();
        assert_eq!(pool.cached_tier(), None);

        pool.acquire(ModelTier::Tiny).await.unwrap();
        assert_eq!(factory.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn release_honours_unload_after_use() {
        let (_, pool) = pool(true);
        pool.acquire(ModelTier::Tiny).await.unwrap();
        pool.release();
        assert_eq!(pool.cached_tier(), None);

        let (_, keep) = super::tests::pool(false);
        keep.acquire(ModelTier::Tiny).await.unwrap();
        keep.release();
        assert_eq!(keep.cached_tier(), Some(ModelTier::Tiny));
    }

    #[tokio::test]
    async fn isolated_loads_bypass_the_cache() {
        let (factory, pool) = pool(false);
        pool.load_isolated(ModelTier::Tiny).await.unwrap();
        pool.load_isolated(ModelTier::Tiny).await.unwrap();
        assert_eq!(factory.loads.load(Ordering::SeqCst), 2);
        assert_eq!(pool.cached_tier(), None);
    }
}
