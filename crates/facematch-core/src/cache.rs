//! Model cache with lazy and background initialization.
//!
//! Each of the three slots (detector, embedder, store) is initialized at most
//! once per success. The first caller to find a slot empty loads it while
//! holding that slot's lock; concurrent callers wait on the lock and then read
//! the stored instance. A failed load leaves the slot empty so the next caller
//! retries. Readiness is mirrored in an atomic flag, so [`ModelCache::status`]
//! never waits on a load in progress.

use crate::detector::Detector;
use crate::embedder::Embedder;
use crate::loader::{LoadError, ModelLoader};
use crate::store::EmbeddingStore;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;

/// One of the cached capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Detector,
    Embedder,
    Store,
}

impl Slot {
    /// Warm-up order: the cheap detector first, the heavy embedder last.
    pub const ALL: [Slot; 3] = [Slot::Detector, Slot::Store, Slot::Embedder];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Detector => "detector",
            Slot::Embedder => "embedder",
            Slot::Store => "store",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{slot} failed to initialize: {source}")]
    Init {
        slot: Slot,
        #[source]
        source: LoadError,
    },
}

impl CacheError {
    pub fn slot(&self) -> Slot {
        match self {
            CacheError::Init { slot, .. } => *slot,
        }
    }
}

/// Point-in-time readiness of every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub detector_ready: bool,
    pub embedder_ready: bool,
    pub store_ready: bool,
}

impl CacheStatus {
    pub fn all_ready(&self) -> bool {
        self.detector_ready && self.embedder_ready && self.store_ready
    }

    pub fn is_ready(&self, slot: Slot) -> bool {
        match slot {
            Slot::Detector => self.detector_ready,
            Slot::Embedder => self.embedder_ready,
            Slot::Store => self.store_ready,
        }
    }
}

/// Everything the recognition pipeline needs, ready to use.
#[derive(Clone)]
pub struct Capabilities {
    pub detector: Arc<dyn Detector>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<EmbeddingStore>,
}

struct ModelSlot<T: ?Sized> {
    slot: Slot,
    value: Mutex<Option<Arc<T>>>,
    ready: AtomicBool,
}

impl<T: ?Sized> ModelSlot<T> {
    fn new(slot: Slot) -> Self {
        Self {
            slot,
            value: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    fn get_or_init(
        &self,
        init: impl FnOnce() -> Result<Arc<T>, LoadError>,
    ) -> Result<Arc<T>, CacheError> {
        // A panic inside `init` poisons the lock with the slot still empty,
        // which is the same state as a failed load.
        let mut guard = crate::lock_recovering(&self.value);
        if let Some(value) = guard.as_ref() {
            return Ok(Arc::clone(value));
        }

        tracing::info!(slot = %self.slot, "initializing");
        let start = Instant::now();

        match init() {
            Ok(value) => {
                *guard = Some(Arc::clone(&value));
                self.ready.store(true, Ordering::Release);
                tracing::info!(
                    slot = %self.slot,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "ready"
                );
                Ok(value)
            }
            Err(source) => {
                tracing::error!(
                    slot = %self.slot,
                    error = %source,
                    "initialization failed; will retry on next access"
                );
                Err(CacheError::Init {
                    slot: self.slot,
                    source,
                })
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Owner of the detector, embedder and embedding store for one process.
///
/// Construct once, wrap in an `Arc`, and hand clones to every consumer.
pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    detector: ModelSlot<dyn Detector>,
    embedder: ModelSlot<dyn Embedder>,
    store: ModelSlot<EmbeddingStore>,
}

impl ModelCache {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            detector: ModelSlot::new(Slot::Detector),
            embedder: ModelSlot::new(Slot::Embedder),
            store: ModelSlot::new(Slot::Store),
        }
    }

    /// Ready detector, loading it on the calling thread if needed.
    pub fn detector(&self) -> Result<Arc<dyn Detector>, CacheError> {
        self.detector.get_or_init(|| self.loader.load_detector())
    }

    /// Ready embedder, loading it on the calling thread if needed.
    pub fn embedder(&self) -> Result<Arc<dyn Embedder>, CacheError> {
        self.embedder.get_or_init(|| self.loader.load_embedder())
    }

    /// Ready embedding store, loading it on the calling thread if needed.
    pub fn store(&self) -> Result<Arc<EmbeddingStore>, CacheError> {
        self.store.get_or_init(|| self.loader.load_store())
    }

    /// Make `slot` ready. Blocks while the slot is being loaded.
    pub fn ensure(&self, slot: Slot) -> Result<(), CacheError> {
        match slot {
            Slot::Detector => self.detector().map(drop),
            Slot::Embedder => self.embedder().map(drop),
            Slot::Store => self.store().map(drop),
        }
    }

    /// All three capabilities, initializing any that are missing.
    pub fn capabilities(&self) -> Result<Capabilities, CacheError> {
        Ok(Capabilities {
            detector: self.detector()?,
            embedder: self.embedder()?,
            store: self.store()?,
        })
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            detector_ready: self.detector.is_ready(),
            embedder_ready: self.embedder.is_ready(),
            store_ready: self.store.is_ready(),
        }
    }

    /// Ensure every slot in warm-up order. Failures are logged by the slot and
    /// do not stop the remaining slots from loading.
    pub fn warm_up(&self) -> CacheStatus {
        let start = Instant::now();
        for slot in Slot::ALL {
            let _ = self.ensure(slot);
        }

        let status = self.status();
        tracing::info!(
            ready = status.all_ready(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "warm-up finished"
        );
        status
    }

    /// Run [`warm_up`](Self::warm_up) on a dedicated thread.
    pub fn spawn_warmup(self: &Arc<Self>) -> std::io::Result<JoinHandle<CacheStatus>> {
        let cache = Arc::clone(self);
        std::thread::Builder::new()
            .name("facematch-warmup".into())
            .spawn(move || {
                tracing::info!("background warm-up started");
                cache.warm_up()
            })
    }
}
