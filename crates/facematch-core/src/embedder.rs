//! FaceNet face embedder via ONNX Runtime.
//!
//! Maps a 160x160 RGB face crop to an L2-normalized embedding (512-d for the
//! keras-facenet export).

use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

pub const FACENET_INPUT_SIZE: u32 = 160;
pub const FACENET_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — export FaceNet to ONNX and place it in the model directory")]
    ModelNotFound(String),
    #[error("face crop is {width}x{height}, embedder expects {expected}x{expected}")]
    InputSize { expected: u32, width: u32, height: u32 },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a normalized face crop to an embedding vector.
///
/// Implementations must tolerate concurrent calls from several request threads.
pub trait Embedder: Send + Sync {
    /// Side length of the square RGB crop accepted by [`Embedder::embed`].
    fn input_size(&self) -> u32;

    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError>;
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, as exported from Keras.
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`
    Nchw,
}

impl std::str::FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nhwc" => Ok(TensorLayout::Nhwc),
            "nchw" => Ok(TensorLayout::Nchw),
            other => Err(format!("unknown tensor layout: {other}")),
        }
    }
}

/// FaceNet-based face embedder.
pub struct OnnxFaceEmbedder {
    session: Mutex<Session>,
    layout: TensorLayout,
}

impl OnnxFaceEmbedder {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &Path, layout: TensorLayout) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            ?layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self {
            session: Mutex::new(session),
            layout,
        })
    }
}

impl Embedder for OnnxFaceEmbedder {
    fn input_size(&self) -> u32 {
        FACENET_INPUT_SIZE
    }

    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let (width, height) = face.dimensions();
        if width != FACENET_INPUT_SIZE || height != FACENET_INPUT_SIZE {
            return Err(EmbedderError::InputSize {
                expected: FACENET_INPUT_SIZE,
                width,
                height,
            });
        }

        let input = preprocess(face, self.layout);

        let raw: Vec<f32> = {
            let mut session = crate::lock_recovering(&self.session);
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;
            raw_data.to_vec()
        };

        if raw.is_empty() {
            return Err(EmbedderError::InferenceFailed("model produced an empty embedding".into()));
        }
        if raw.len() != FACENET_EMBEDDING_DIM {
            tracing::debug!(dim = raw.len(), "embedding dimension differs from FaceNet default");
        }

        Ok(Embedding::new(l2_normalize(raw)?))
    }
}

fn l2_normalize(raw: Vec<f32>) -> Result<Vec<f32>, EmbedderError> {
    if raw.iter().any(|x| !x.is_finite()) {
        return Err(EmbedderError::InferenceFailed("embedding contains non-finite values".into()));
    }
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    Ok(if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    })
}

/// Per-image standardization (FaceNet "prewhiten") into a float tensor.
///
/// Subtracts the mean over all pixels and channels and divides by the standard
/// deviation, floored at `1/sqrt(N)` so flat crops do not blow up.
fn preprocess(face: &RgbImage, layout: TensorLayout) -> Array4<f32> {
    let (width, height) = face.dimensions();
    let (w, h) = (width as usize, height as usize);
    let raw = face.as_raw();
    let n = raw.len().max(1) as f64;

    let mean = raw.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = raw.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt().max(1.0 / n.sqrt()) as f32;
    let mean = mean as f32;

    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
    };

    for (x, y, pixel) in face.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = (pixel[c] as f32 - mean) / std;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
            }
        }
    }

    tensor
}
