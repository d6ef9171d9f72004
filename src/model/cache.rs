//! # Model Cache
//!
//! Single-slot resource manager for the one loaded model. Loading a Whisper
//! model is expensive (hundreds of MB of weights, possibly a network fetch),
//! so the whole service shares a single slot: acquiring a tier that is
//! already loaded is free, acquiring a different one evicts and swaps under
//! an exclusive critical section.
//!
//! ## Guarantees:
//! - At most one model is installed in the slot at any instant.
//! - Only one acquire executes its load/swap logic at a time process-wide;
//!   concurrent callers block on the slot mutex.
//! - A handle stays valid for as long as the caller holds it, even if the
//!   slot is swapped underneath: handles are `Arc`s, eviction only drops the
//!   cache's own reference, and the evicted model's resources are released
//!   when the last outstanding handle goes away.
//! - A failed load leaves the slot empty, never a partial model.

use crate::device;
use crate::engine::{LoadedSpeechModel, SpeechEngine};
use crate::error::{AppError, AppResult};
use crate::model::tier::ModelTier;
use candle_core::Device;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reference-counted handle to a loaded model.
pub type ModelHandle = Arc<dyn LoadedSpeechModel>;

/// What the slot currently holds.
struct CachedModel {
    tier: ModelTier,
    /// Whether the model was loaded onto an accelerator. A GPU-loaded model
    /// does not satisfy a CPU request and vice versa.
    on_accelerator: bool,
    handle: ModelHandle,
}

/// Outcome of an explicit model switch, reported by the switch endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SwitchOutcome {
    pub previous_model: Option<ModelTier>,
    pub current_model: Option<ModelTier>,
    pub reloaded: bool,
}

/// The single-slot cache. All mutation happens while holding `slot`;
/// read-only checks take the same lock briefly and return a snapshot.
pub struct ModelCache {
    engine: Arc<dyn SpeechEngine>,
    slot: Mutex<Option<CachedModel>>,
}

impl ModelCache {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            slot: Mutex::new(None),
        }
    }

    /// Acquire a handle to `tier` on `device`.
    ///
    /// Hit path: the slot already holds the requested tier on a compatible
    /// device and `force_reload` is false, so the existing handle is cloned
    /// at zero load cost. Otherwise the current occupant is evicted, a
    /// memory-reclaim hint is issued, and the new model is loaded on a
    /// blocking thread while the slot lock is held; concurrent acquires wait.
    ///
    /// After installation the slot's recorded tier is verified against the
    /// request; a mismatch fails with `LoadMismatch` rather than silently
    /// handing out the wrong model.
    pub async fn acquire(
        &self,
        tier: ModelTier,
        device: &Device,
        force_reload: bool,
    ) -> AppResult<ModelHandle> {
        let on_accelerator = device::is_accelerator(device);
        let mut slot = self.slot.lock().await;

        if !force_reload {
            if let Some(cached) = slot.as_ref() {
                if cached.tier == tier && cached.on_accelerator == on_accelerator {
                    debug!(model = %tier, "model cache hit");
                    return Ok(cached.handle.clone());
                }
            }
        }

        if let Some(evicted) = slot.take() {
            info!(
                from = %evicted.tier,
                to = %tier,
                "evicting cached model; outstanding handles stay valid until dropped"
            );
            // The slot's reference goes away here. Jobs still holding the
            // old handle keep it alive; the weights are freed when the last
            // clone drops.
            drop(evicted);
        }
        device::reclaim_hint(device);

        info!(model = %tier, "loading model into cache slot");
        let engine = self.engine.clone();
        let load_device = device.clone();
        let loaded = tokio::task::spawn_blocking(move || engine.load(tier, &load_device))
            .await
            .map_err(|e| AppError::Internal(format!("model load task panicked: {}", e)))?
            .map_err(|e| AppError::LoadFailure(format!("failed to load {}: {}", tier, e)))?;

        let handle: ModelHandle = Arc::from(loaded);
        *slot = Some(CachedModel {
            tier: handle.tier(),
            on_accelerator,
            handle: handle.clone(),
        });

        // Post-install identity check. Should never trigger with a correct
        // engine, but a wrong model must never be used silently.
        if handle.tier() != tier {
            warn!(
                requested = %tier,
                loaded = %handle.tier(),
                "loaded model does not match the request"
            );
            return Err(AppError::LoadMismatch(format!(
                "requested model {} but the engine loaded {}",
                tier,
                handle.tier()
            )));
        }

        info!(model = %tier, "model installed in cache slot");
        Ok(handle)
    }

    /// Tier currently installed in the slot, if any.
    pub async fn current(&self) -> Option<ModelTier> {
        self.slot.lock().await.as_ref().map(|c| c.tier)
    }

    /// Explicit model switch for the switch endpoint. `verify_only` reports
    /// whether the cached tier matches without mutating anything.
    pub async fn switch(
        &self,
        tier: ModelTier,
        device: &Device,
        force: bool,
    ) -> AppResult<SwitchOutcome> {
        let previous = self.current().await;
        let needs_load = force || previous != Some(tier);
        self.acquire(tier, device, force).await?;
        Ok(SwitchOutcome {
            previous_model: previous,
            current_model: self.current().await,
            reloaded: needs_load,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Segment, TranscribeOptions};
    use anyhow::anyhow;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine stub that counts loads and can be told to fail or to return
    /// the wrong tier.
    struct StubEngine {
        loads: AtomicUsize,
        fail: bool,
        wrong_tier: Option<ModelTier>,
    }

    impl StubEngine {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail: false,
                wrong_tier: None,
            }
        }

        fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    struct StubModel {
        tier: ModelTier,
    }

    impl LoadedSpeechModel for StubModel {
        fn tier(&self) -> ModelTier {
            self.tier
        }

        fn transcribe(&self, _audio: &Path, _opts: &TranscribeOptions) -> anyhow::Result<Vec<Segment>> {
            Ok(vec![])
        }
    }

    impl SpeechEngine for StubEngine {
        fn load(
            &self,
            tier: ModelTier,
            _device: &Device,
        ) -> anyhow::Result<Box<dyn LoadedSpeechModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("simulated load failure"));
            }
            Ok(Box::new(StubModel {
                tier: self.wrong_tier.unwrap_or(tier),
            }))
        }
    }

    fn cache_with(engine: StubEngine) -> (Arc<StubEngine>, ModelCache) {
        let engine = Arc::new(engine);
        let cache = ModelCache::new(engine.clone());
        (engine, cache)
    }

    #[tokio::test]
    async fn test_acquire_sequence_a_b_a_loads_three_times() {
        let (engine, cache) = cache_with(StubEngine::new());
        let cpu = Device::Cpu;

        cache.acquire(ModelTier::Tiny, &cpu, false).await.unwrap();
        cache.acquire(ModelTier::Base, &cpu, false).await.unwrap();
        cache.acquire(ModelTier::Tiny, &cpu, false).await.unwrap();

        // Single slot: returning to A after B forces a third load
        assert_eq!(engine.load_count(), 3);
        assert_eq!(cache.current().await, Some(ModelTier::Tiny));
    }

    #[tokio::test]
    async fn test_concurrent_acquires_of_cached_model_do_not_reload() {
        let (engine, cache) = cache_with(StubEngine::new());
        let cache = Arc::new(cache);
        let cpu = Device::Cpu;

        cache.acquire(ModelTier::Small, &cpu, false).await.unwrap();
        assert_eq!(engine.load_count(), 1);

        let a = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.acquire(ModelTier::Small, &Device::Cpu, false).await })
        };
        let b = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.acquire(ModelTier::Small, &Device::Cpu, false).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Both concurrent callers hit the cached slot
        assert_eq!(engine.load_count(), 1);
    }

    #[tokio::test]
    async fn test_force_reload_reloads_same_tier() {
        let (engine, cache) = cache_with(StubEngine::new());
        let cpu = Device::Cpu;

        cache.acquire(ModelTier::Small, &cpu, false).await.unwrap();
        cache.acquire(ModelTier::Small, &cpu, true).await.unwrap();
        assert_eq!(engine.load_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_slot_empty() {
        let mut engine = StubEngine::new();
        engine.fail = true;
        let (_, cache) = cache_with(engine);

        let result = cache.acquire(ModelTier::Base, &Device::Cpu, false).await;
        assert!(matches!(result, Err(AppError::LoadFailure(_))));
        assert_eq!(cache.current().await, None);
    }

    #[tokio::test]
    async fn test_tier_mismatch_is_reported() {
        let mut engine = StubEngine::new();
        engine.wrong_tier = Some(ModelTier::Tiny);
        let (_, cache) = cache_with(engine);

        let result = cache.acquire(ModelTier::Medium, &Device::Cpu, false).await;
        assert!(matches!(result, Err(AppError::LoadMismatch(_))));
    }

    #[tokio::test]
    async fn test_evicted_handle_remains_usable() {
        let (_, cache) = cache_with(StubEngine::new());
        let cpu = Device::Cpu;

        let old = cache.acquire(ModelTier::Tiny, &cpu, false).await.unwrap();
        cache.acquire(ModelTier::Base, &cpu, false).await.unwrap();

        // The slot moved on but the old handle still answers for its tier
        assert_eq!(old.tier(), ModelTier::Tiny);
        assert_eq!(cache.current().await, Some(ModelTier::Base));
    }

    #[tokio::test]
    async fn test_switch_reports_previous_and_current() {
        let (_, cache) = cache_with(StubEngine::new());
        let cpu = Device::Cpu;

        let first = cache.switch(ModelTier::Tiny, &cpu, false).await.unwrap();
        assert_eq!(first.previous_model, None);
        assert_eq!(first.current_model, Some(ModelTier::Tiny));
        assert!(first.reloaded);

        let second = cache.switch(ModelTier::Tiny, &cpu, false).await.unwrap();
        assert_eq!(second.previous_model, Some(ModelTier::Tiny));
        assert!(!second.reloaded);
    }
}
