//! In-memory capabilities for unit tests.

use crate::detector::{Detector, DetectorError};
use crate::embedder::{Embedder, EmbedderError};
use crate::loader::{LoadError, ModelLoader};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns the same boxes for every image, in the given order.
#[derive(Default)]
pub struct FixedDetector {
    pub boxes: Vec<BoundingBox>,
}

impl Detector for FixedDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.boxes.clone())
    }
}

pub struct FailingDetector;

impl Detector for FailingDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Err(DetectorError::InferenceFailed("synthetic failure".into()))
    }
}

/// Embeds a crop as its mean RGB value (3 dimensions, 0–255 scale).
///
/// Fails for crops whose top-left pixel equals `fail_on`.
pub struct MeanColorEmbedder {
    pub size: u32,
    pub fail_on: Option<Rgb<u8>>,
}

impl Default for MeanColorEmbedder {
    fn default() -> Self {
        Self { size: 8, fail_on: None }
    }
}

impl Embedder for MeanColorEmbedder {
    fn input_size(&self) -> u32 {
        self.size
    }

    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        if face.dimensions() != (self.size, self.size) {
            return Err(EmbedderError::InputSize {
                expected: self.size,
                width: face.width(),
                height: face.height(),
            });
        }
        if self.fail_on.is_some_and(|color| *face.get_pixel(0, 0) == color) {
            return Err(EmbedderError::InferenceFailed("synthetic failure".into()));
        }

        let n = (face.width() * face.height()) as f32;
        let mut sums = [0.0f32; 3];
        for pixel in face.pixels() {
            for c in 0..3 {
                sums[c] += pixel[c] as f32;
            }
        }
        Ok(Embedding::new(sums.iter().map(|s| s / n).collect()))
    }
}

/// Per-slot load counters shared with the test body.
#[derive(Default)]
pub struct LoadCounts {
    pub detector: AtomicUsize,
    pub embedder: AtomicUsize,
    pub store: AtomicUsize,
}

/// Loader that counts calls, optionally sleeps, and can fail the store.
#[derive(Default)]
pub struct CountingLoader {
    counts: Arc<LoadCounts>,
    delay: Duration,
    store_failures: usize,
}

impl CountingLoader {
    pub fn counts(&self) -> Arc<LoadCounts> {
        Arc::clone(&self.counts)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `times` store loads.
    pub fn failing_store(mut self, times: usize) -> Self {
        self.store_failures = times;
        self
    }

    fn tick(&self, counter: &AtomicUsize) -> usize {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl ModelLoader for CountingLoader {
    fn load_detector(&self) -> Result<Arc<dyn Detector>, LoadError> {
        self.tick(&self.counts.detector);
        Ok(Arc::new(FixedDetector::default()))
    }

    fn load_embedder(&self) -> Result<Arc<dyn Embedder>, LoadError> {
        self.tick(&self.counts.embedder);
        Ok(Arc::new(MeanColorEmbedder::default()))
    }

    fn load_store(&self) -> Result<Arc<EmbeddingStore>, LoadError> {
        let attempt = self.tick(&self.counts.store);
        if attempt <= self.store_failures {
            return Err(StoreError::NotFound(format!("attempt {attempt}")).into());
        }
        Ok(Arc::new(EmbeddingStore::default()))
    }
}

/// Hands out prebuilt capabilities.
pub struct StaticLoader {
    pub detector: Arc<dyn Detector>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<EmbeddingStore>,
}

impl ModelLoader for StaticLoader {
    fn load_detector(&self) -> Result<Arc<dyn Detector>, LoadError> {
        Ok(Arc::clone(&self.detector))
    }

    fn load_embedder(&self) -> Result<Arc<dyn Embedder>, LoadError> {
        Ok(Arc::clone(&self.embedder))
    }

    fn load_store(&self) -> Result<Arc<EmbeddingStore>, LoadError> {
        Ok(Arc::clone(&self.store))
    }
}
