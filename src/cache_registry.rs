// src/cache_registry.rs
//!
//! Centralized registry of per-build caches (`NavTreeCache`, scaffold
//! cache, template lookup cache, ...), grounded on
//! `original_source/bengal/utils/cache_registry.py`: every long-lived
//! cache registers a name plus a cleanup closure once, and the
//! orchestrator invalidates by name or clears everything at once rather
//! than reaching into each cache module directly.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

/// Reasons the orchestrator or incremental filter can give for invalidating
/// registered caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum InvalidationReason {
    ConfigChanged,
    ContentChanged,
    TemplateChanged,
    VersionChanged,
    FullRebuild,
}

type CleanupFn = Box<dyn Fn(InvalidationReason) + Send + Sync>;

struct Entry {
    cleanup: CleanupFn,
}

/// A process-wide registry of cache cleanup callbacks. One instance lives
/// on `BuildContext`; nothing here is actually global mutable state — it's
/// owned by the orchestrator and dropped at the end of the build, unlike
/// the Python original's module-level dict.
#[derive(Default)]
pub(crate) struct CacheRegistry {
    caches: Mutex<HashMap<String, Entry>>,
}

impl CacheRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with a cleanup closure invoked on
    /// `clear_all_caches`/`invalidate_for_reason`. Re-registering the same
    /// name replaces the previous closure.
    pub(crate) fn register_cache(&self, name: impl Into<String>, cleanup: CleanupFn) {
        let name = name.into();
        debug!("cache_registry::register {}", name);
        self.caches.lock().unwrap().insert(name, Entry { cleanup });
    }

    pub(crate) fn unregister_cache(&self, name: &str) {
        self.caches.lock().unwrap().remove(name);
    }

    /// Invokes every registered cleanup, logging (not propagating) any
    /// panic so one broken cache can't stop the others from clearing.
    pub(crate) fn clear_all_caches(&self, reason: InvalidationReason) {
        let caches = self.caches.lock().unwrap();
        for (name, entry) in caches.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (entry.cleanup)(reason)));
            if result.is_err() {
                warn!("cache_registry::cleanup panicked for {}", name);
            }
        }
    }

    /// Invalidates only caches registered under `names`.
    pub(crate) fn invalidate_for_reason(&self, names: &[&str], reason: InvalidationReason) {
        let caches = self.caches.lock().unwrap();
        for name in names {
            if let Some(entry) = caches.get(*name) {
                (entry.cleanup)(reason);
            }
        }
    }

    pub(crate) fn list_registered_caches(&self) -> Vec<String> {
        self.caches.lock().unwrap().keys().cloned().collect()
    }
}
