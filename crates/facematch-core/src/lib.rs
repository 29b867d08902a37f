//! facematch-core — Face recognition against a precomputed embedding store.
//!
//! Uses SCRFD for face detection and FaceNet for face embeddings, both running
//! via ONNX Runtime, and a linear Euclidean nearest-neighbor match. Models and
//! the store live in a [`ModelCache`] that loads them lazily or in the
//! background.

pub mod cache;
pub mod detector;
pub mod embedder;
pub mod loader;
pub mod pipeline;
pub mod preprocess;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use cache::{CacheError, CacheStatus, Capabilities, ModelCache, Slot};
pub use detector::{Detector, DetectorOptions, OnnxFaceDetector};
pub use embedder::{Embedder, OnnxFaceEmbedder, TensorLayout};
pub use loader::{LoadError, ModelLoader, ModelPaths, OnnxModelLoader};
pub use pipeline::{recognize_image, RecognitionPipeline, RecognizeError};
pub use store::{EmbeddingStore, StoreError};
pub use types::{
    BoundingBox, Embedding, EuclideanMatcher, FaceMatch, FaceRegion, MatchLabel, MatchResult,
    Matcher, DEFAULT_MATCH_THRESHOLD,
};

/// `$XDG_DATA_HOME/facematch`, falling back to `~/.local/share/facematch`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
}

/// Directory searched for `det_10g.onnx` and `facenet.onnx`.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

/// Lock `mutex`, taking over the guard if a previous holder panicked.
///
/// Every mutex in this crate guards state that stays valid across a panic: an
/// ONNX session between runs, or a cache slot that is either empty or filled.
pub(crate) fn lock_recovering<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
