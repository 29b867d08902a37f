use facematch_core::detector::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MIN_FACE_SIZE};
use facematch_core::{DetectorOptions, ModelPaths, OnnxModelLoader, TensorLayout, DEFAULT_MATCH_THRESHOLD};
use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the JSON embedding store.
    pub store_path: PathBuf,
    /// Euclidean distance below which a face matches an identity.
    pub match_threshold: f32,
    /// Minimum SCRFD score for a detection.
    pub detection_threshold: f32,
    /// Smallest face side, in pixels, that is kept.
    pub min_face_size: u32,
    /// Whether to start loading every model in the background at startup.
    pub warmup_enabled: bool,
    /// Input layout of the FaceNet export.
    pub embedder_layout: TensorLayout,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEMATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facematch_core::default_model_dir());

        let store_path = std::env::var("FACEMATCH_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facematch_core::default_data_dir().join("embeddings.json"));

        let embedder_layout = std::env::var("FACEMATCH_EMBEDDER_LAYOUT")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(layout) => Some(layout),
                Err(err) => {
                    tracing::warn!(%err, "ignoring FACEMATCH_EMBEDDER_LAYOUT");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            model_dir,
            store_path,
            match_threshold: env_f32("FACEMATCH_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            detection_threshold: env_f32("FACEMATCH_DETECTION_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD),
            min_face_size: env_u32("FACEMATCH_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            warmup_enabled: std::env::var("FACEMATCH_WARMUP")
                .map(|v| v != "0")
                .unwrap_or(true),
            embedder_layout,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the FaceNet embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join("facenet.onnx")
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model_path(),
            embedder: self.embedder_model_path(),
            store: self.store_path.clone(),
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.detection_threshold,
            min_face_size: self.min_face_size,
        }
    }

    pub fn loader(&self) -> OnnxModelLoader {
        OnnxModelLoader::new(self.model_paths())
            .with_detector_options(self.detector_options())
            .with_embedder_layout(self.embedder_layout)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
