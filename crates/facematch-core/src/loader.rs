//! Construction of the expensive capabilities held by [`ModelCache`](crate::cache::ModelCache).

use crate::detector::{Detector, DetectorError, DetectorOptions, OnnxFaceDetector};
use crate::embedder::{Embedder, EmbedderError, OnnxFaceEmbedder, TensorLayout};
use crate::store::{EmbeddingStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Builds each cached capability from scratch. Called at most once per
/// successful initialization, possibly again after a failure.
pub trait ModelLoader: Send + Sync {
    fn load_detector(&self) -> Result<Arc<dyn Detector>, LoadError>;
    fn load_embedder(&self) -> Result<Arc<dyn Embedder>, LoadError>;
    fn load_store(&self) -> Result<Arc<EmbeddingStore>, LoadError>;
}

/// Filesystem locations of the two models and the embedding store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub embedder: PathBuf,
    pub store: PathBuf,
}

/// Loads the SCRFD detector, the FaceNet embedder and the JSON store.
pub struct OnnxModelLoader {
    paths: ModelPaths,
    detector_options: DetectorOptions,
    embedder_layout: TensorLayout,
}

impl OnnxModelLoader {
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            paths,
            detector_options: DetectorOptions::default(),
            embedder_layout: TensorLayout::default(),
        }
    }

    pub fn with_detector_options(mut self, options: DetectorOptions) -> Self {
        self.detector_options = options;
        self
    }

    pub fn with_embedder_layout(mut self, layout: TensorLayout) -> Self {
        self.embedder_layout = layout;
        self
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load_detector(&self) -> Result<Arc<dyn Detector>, LoadError> {
        let detector = OnnxFaceDetector::load(&self.paths.detector, self.detector_options)?;
        Ok(Arc::new(detector))
    }

    fn load_embedder(&self) -> Result<Arc<dyn Embedder>, LoadError> {
        let embedder = OnnxFaceEmbedder::load(&self.paths.embedder, self.embedder_layout)?;
        Ok(Arc::new(embedder))
    }

    fn load_store(&self) -> Result<Arc<EmbeddingStore>, LoadError> {
        Ok(Arc::new(EmbeddingStore::load(&self.paths.store)?))
    }
}
