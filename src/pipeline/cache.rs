//! Lazy, process-lifetime caching of the synthesis model.

use std::sync::{Arc, Mutex, PoisonError};

use crate::ModelLoadError;

type ModelFactory<M> = Box<dyn Fn() -> Result<M, ModelLoadError> + Send + Sync>;

/// Owns the one model instance for the process lifetime.
///
/// The model is constructed on the first [`ModelCache::ensure`] call and
/// shared as an `Arc` afterwards. Construction is serialized behind the slot
/// lock, so concurrent first requests cause exactly one build. A failed
/// build leaves the slot empty — never poisoned — so a later request can
/// retry.
pub struct ModelCache<M> {
    slot: Mutex<Option<Arc<M>>>,
    factory: ModelFactory<M>,
}

impl<M> ModelCache<M> {
    /// Create a cache around the given model factory.
    ///
    /// The factory runs at most once per successful load; it is kept for
    /// retries after a failed load.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<M, ModelLoadError> + Send + Sync + 'static,
    {
        Self {
            slot: Mutex::new(None),
            factory: Box::new(factory),
        }
    }

    /// Return the cached model, constructing it first if necessary.
    pub fn ensure(&self) -> Result<Arc<M>, ModelLoadError> {
        let mut slot = self.lock_slot();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        log::info!("Constructing synthesis model");
        let model = Arc::new((self.factory)()?);
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Whether the model is already loaded, without triggering a load.
    pub fn is_warm(&self) -> bool {
        self.lock_slot().is_some()
    }

    // A factory panic must not poison the slot for future retries.
    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<M>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ensure_constructs_exactly_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cache = ModelCache::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42u32)
        });

        assert!(!cache.is_warm());
        let first = cache.ensure().expect("factory succeeds");
        let second = cache.ensure().expect("cached");
        let third = cache.ensure().expect("cached");

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert!(cache.is_warm());
    }

    #[test]
    fn failed_load_leaves_the_cache_cold() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let cache = ModelCache::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ModelLoadError("checkpoint missing".to_string()))
            } else {
                Ok(7u32)
            }
        });

        assert!(cache.ensure().is_err());
        assert!(!cache.is_warm(), "a failed load must not warm the cache");

        let model = cache.ensure().expect("retry succeeds");
        assert_eq!(*model, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_requests_build_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cache = Arc::new(ModelCache::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(0u8)
        }));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.ensure().map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().expect("no panics").expect("load succeeds");
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
