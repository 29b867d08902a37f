//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.
//! Boxes are reported in source-image pixels, rounded to integers, strongest first.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Faces smaller than this many pixels on either side are dropped.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 20;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in an RGB image.
///
/// Implementations must tolerate concurrent calls from several request threads.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub confidence_threshold: f32,
    pub min_face_size: u32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// Decoded detection in source-image float coordinates, before NMS.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// SCRFD-based face detector.
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
    options: DetectorOptions,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl OnnxFaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // 6 outputs for box-only exports, 9 when keypoint heads are present.
        if num_outputs < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            options,
            stride_indices,
        })
    }
}

impl Detector for OnnxFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image);
        let mut candidates = Vec::new();

        {
            let mut session = crate::lock_recovering(&self.session);
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
                let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

                let (_, scores) = outputs[score_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
                let (_, bboxes) = outputs[bbox_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

                candidates.extend(decode_stride(
                    scores,
                    bboxes,
                    stride,
                    SCRFD_INPUT_SIZE,
                    &letterbox,
                    self.options.confidence_threshold,
                ));
            }
        }

        let kept = nms(candidates, SCRFD_NMS_THRESHOLD);
        let faces: Vec<BoundingBox> = kept
            .iter()
            .filter_map(|c| to_bounding_box(c, self.options.min_face_size))
            .collect();

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            candidates = kept.len(),
            faces = faces.len(),
            "SCRFD detection"
        );

        Ok(faces)
    }
}

/// Letterbox an RGB image into a 640x640 NCHW float tensor.
///
/// Padding is filled with the mean so it normalizes to 0.0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) as f32 / 2.0;

    let letterbox = LetterboxInfo { scale, pad_x, pad_y };
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = pad_x_start + x as usize;
        let ty = pad_y_start + y as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports either name their heads ("score_8", "bbox_16", ...) or use
/// generic numeric names. Named heads are mapped to stride slots; otherwise the
/// standard positional ordering is assumed:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Candidate> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * step;
        let anchor_cy = (anchor_idx / grid) as f32 * step;

        // Distances to the four box edges, in stride units.
        let x1 = anchor_cx - bboxes[bbox_off] * step;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * step;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * step;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * step;

        detections.push(Candidate {
            x1: (x1 - letterbox.pad_x) / letterbox.scale,
            y1: (y1 - letterbox.pad_y) / letterbox.scale,
            x2: (x2 - letterbox.pad_x) / letterbox.scale,
            y2: (y2 - letterbox.pad_y) / letterbox.scale,
            score,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections, strongest first.
fn nms(mut detections: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two candidates.
fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter = Candidate {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    }
    .area();

    let union_area = a.area() + b.area() - inter;
    if union_area > 0.0 {
        inter / union_area
    } else {
        0.0
    }
}

fn to_bounding_box(candidate: &Candidate, min_face_size: u32) -> Option<BoundingBox> {
    let x = candidate.x1.round() as i32;
    let y = candidate.y1.round() as i32;
    let width = (candidate.x2 - candidate.x1).round() as i32;
    let height = (candidate.y2 - candidate.y1).round() as i32;

    let min = i32::try_from(min_face_size).unwrap_or(i32::MAX);
    if width < min || height < min {
        tracing::trace!(width, height, min_face_size, "dropping face below minimum size");
        return None;
    }

    Some(BoundingBox {
        x,
        y,
        width,
        height,
        confidence: candidate.score,
    })
}
