//! Detection → crop → embedding → match, for one image at a time.

use crate::cache::{CacheError, CacheStatus, Capabilities, ModelCache};
use crate::detector::DetectorError;
use crate::embedder::EmbedderError;
use crate::preprocess::{self, DecodeError};
use crate::types::{
    EuclideanMatcher, FaceMatch, FaceRegion, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD,
};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Image-level failure. Per-face problems never surface here.
#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("models not ready: {0}")]
    NotReady(#[from] CacheError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectorError),
}

impl RecognizeError {
    /// `NotReady` clears once the slot loads; the others will fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecognizeError::NotReady(_))
    }
}

/// Failure confined to a single detected face.
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("region {region:?} lies outside the {width}x{height} image")]
    Crop {
        region: FaceRegion,
        width: u32,
        height: u32,
    },
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A clipped detection and the pixels it covers.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub crop: RgbImage,
}

impl DetectedFace {
    pub fn extract(image: &RgbImage, region: FaceRegion) -> Result<Self, FaceError> {
        let crop = preprocess::crop_region(image, &region).ok_or(FaceError::Crop {
            region,
            width: image.width(),
            height: image.height(),
        })?;
        Ok(Self { region, crop })
    }
}

/// Recognizes faces in encoded images using capabilities from a shared cache.
#[derive(Clone)]
pub struct RecognitionPipeline {
    cache: Arc<ModelCache>,
    threshold: f32,
}

impl RecognitionPipeline {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            cache,
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }

    /// Recognize every face in an encoded image.
    ///
    /// All capabilities are acquired (loading lazily if needed) before the
    /// image is decoded, so a missing model fails fast with `NotReady`.
    pub fn recognize(&self, image_bytes: &[u8]) -> Result<Vec<MatchResult>, RecognizeError> {
        let capabilities = self.cache.capabilities()?;
        let image = preprocess::decode_rgb(image_bytes)?;
        recognize_image(&capabilities, &image, self.threshold)
    }
}

/// Recognize every face in an already decoded RGB image.
///
/// Results follow detector order. Boxes that clip to nothing are skipped; a
/// face that fails to crop or embed yields an "error" result in its place.
pub fn recognize_image(
    capabilities: &Capabilities,
    image: &RgbImage,
    threshold: f32,
) -> Result<Vec<MatchResult>, RecognizeError> {
    let start = Instant::now();
    let (width, height) = image.dimensions();
    let boxes = capabilities.detector.detect(image)?;

    let mut results = Vec::with_capacity(boxes.len());
    for bbox in &boxes {
        let Some(region) = bbox.clip(width, height) else {
            tracing::debug!(?bbox, width, height, "detection clipped to nothing; skipping");
            continue;
        };

        let result = match match_face(capabilities, image, region, threshold) {
            Ok(face_match) => MatchResult::from_match(face_match, region),
            Err(err) => {
                tracing::warn!(?region, error = %err, "face processing failed");
                MatchResult::error(region)
            }
        };
        results.push(result);
    }

    tracing::debug!(
        width,
        height,
        detections = boxes.len(),
        results = results.len(),
        known = results.iter().filter(|r| r.label.is_known()).count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "recognition finished"
    );

    Ok(results)
}

fn match_face(
    capabilities: &Capabilities,
    image: &RgbImage,
    region: FaceRegion,
    threshold: f32,
) -> Result<FaceMatch, FaceError> {
    let face = DetectedFace::extract(image, region)?;
    let input = preprocess::resize_square(&face.crop, capabilities.embedder.input_size());
    let embedding = capabilities.embedder.embed(&input)?;

    if let Some(expected) = capabilities.store.dim() {
        if embedding.dim() != expected {
            return Err(FaceError::DimensionMismatch {
                expected,
                actual: embedding.dim(),
            });
        }
    }

    Ok(EuclideanMatcher.compare(&embedding, &capabilities.store, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::embedder::Embedder;
    use crate::store::EmbeddingStore;
    use crate::testing::{CountingLoader, FailingDetector, FixedDetector, MeanColorEmbedder, StaticLoader};
    use crate::types::{BoundingBox, MatchLabel};
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    /// 60x20 image: red, green and blue 20x20 squares left to right.
    fn three_faces() -> RgbImage {
        RgbImage::from_fn(60, 20, |x, _| match x / 20 {
            0 => RED,
            1 => GREEN,
            _ => BLUE,
        })
    }

    fn three_boxes() -> Vec<BoundingBox> {
        vec![
            BoundingBox::new(0, 0, 20, 20),
            BoundingBox::new(20, 0, 20, 20),
            BoundingBox::new(40, 0, 20, 20),
        ]
    }

    fn color_store() -> EmbeddingStore {
        EmbeddingStore::from_entries(vec![
            ("rosa", vec![vec![255.0, 0.0, 0.0]]),
            ("verde", vec![vec![0.0, 255.0, 0.0]]),
            ("azul", vec![vec![0.0, 0.0, 255.0]]),
        ])
        .unwrap()
    }

    fn capabilities(
        boxes: Vec<BoundingBox>,
        embedder: MeanColorEmbedder,
        store: EmbeddingStore,
    ) -> Capabilities {
        Capabilities {
            detector: Arc::new(FixedDetector { boxes }),
            embedder: Arc::new(embedder),
            store: Arc::new(store),
        }
    }

    fn labels(results: &[MatchResult]) -> Vec<String> {
        results.iter().map(|r| r.label.to_string()).collect()
    }

    fn png(image: RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_recognizes_each_face_in_detector_order() {
        let mut boxes = three_boxes();
        boxes.reverse();
        let caps = capabilities(boxes, MeanColorEmbedder::default(), color_store());

        let results = recognize_image(&caps, &three_faces(), 0.8).unwrap();

        assert_eq!(labels(&results), ["azul", "verde", "rosa"]);
        assert!(results.iter().all(|r| r.distance < 1e-3));
        assert_eq!(results[0].region, FaceRegion { x: 40, y: 0, width: 20, height: 20 });
    }

    #[test]
    fn test_one_failing_face_does_not_abort_others() {
        let embedder = MeanColorEmbedder { fail_on: Some(GREEN), ..Default::default() };
        let caps = capabilities(three_boxes(), embedder, color_store());

        let results = recognize_image(&caps, &three_faces(), 0.8).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(labels(&results), ["rosa", "error", "azul"]);
        assert_eq!(results.iter().filter(|r| r.label == MatchLabel::Error).count(), 1);
        assert_eq!(results[1].distance, f32::INFINITY);
        assert!(results[0].distance.is_finite());
        assert!(results[2].distance.is_finite());
    }

    #[test]
    fn test_zero_faces_is_empty_success() {
        let caps = capabilities(vec![], MeanColorEmbedder::default(), color_store());
        let results = recognize_image(&caps, &three_faces(), 0.8).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_boxes_are_clipped_and_empty_ones_skipped() {
        let boxes = vec![
            BoundingBox::new(-10, -4, 20, 30),
            BoundingBox::new(60, 0, 20, 20),
            BoundingBox::new(-30, 0, 20, 20),
            BoundingBox::new(45, 5, 40, 40),
            BoundingBox::new(10, 10, 0, 5),
        ];
        let caps = capabilities(boxes, MeanColorEmbedder::default(), color_store());

        let results = recognize_image(&caps, &three_faces(), 0.8).unwrap();

        assert_eq!(labels(&results), ["rosa", "rosa", "azul"]);
        assert_eq!(results[0].region, FaceRegion { x: 0, y: 0, width: 20, height: 20 });
        assert_eq!(results[1].region, FaceRegion { x: 0, y: 0, width: 20, height: 20 });
        assert_eq!(results[2].region, FaceRegion { x: 45, y: 5, width: 15, height: 15 });
    }

    #[test]
    fn test_unenrolled_face_is_unknown() {
        let store = EmbeddingStore::from_entries(vec![("rosa", vec![vec![255.0, 0.0, 0.0]])]).unwrap();
        let caps = capabilities(three_boxes(), MeanColorEmbedder::default(), store);

        let results = recognize_image(&caps, &three_faces(), 0.8).unwrap();

        assert_eq!(labels(&results), ["rosa", "unknown", "unknown"]);
        assert_eq!(results[1].distance, f32::INFINITY);
    }

    #[test]
    fn test_dimension_mismatch_is_per_face_error() {
        let store = EmbeddingStore::from_entries(vec![("flat", vec![vec![1.0, 2.0]])]).unwrap();
        let caps = capabilities(three_boxes(), MeanColorEmbedder::default(), store);

        let results = recognize_image(&caps, &three_faces(), 0.8).unwrap();

        assert_eq!(labels(&results), ["error", "error", "error"]);
    }

    #[test]
    fn test_detector_failure_is_image_level() {
        let caps = Capabilities {
            detector: Arc::new(FailingDetector),
            embedder: Arc::new(MeanColorEmbedder::default()),
            store: Arc::new(color_store()),
        };
        let err = recognize_image(&caps, &three_faces(), 0.8).unwrap_err();
        assert!(matches!(err, RecognizeError::Detection(_)));
        assert!(!err.is_retryable());
    }

    fn ready_pipeline() -> RecognitionPipeline {
        let detector: Arc<dyn Detector> = Arc::new(FixedDetector { boxes: three_boxes() });
        let embedder: Arc<dyn Embedder> = Arc::new(MeanColorEmbedder::default());
        let cache = ModelCache::new(StaticLoader {
            detector,
            embedder,
            store: Arc::new(color_store()),
        });
        RecognitionPipeline::new(Arc::new(cache))
    }

    #[test]
    fn test_recognize_decodes_and_matches() {
        let pipeline = ready_pipeline();

        let results = pipeline.recognize(&png(three_faces())).unwrap();

        assert_eq!(labels(&results), ["rosa", "verde", "azul"]);
        assert!(pipeline.status().all_ready());
    }

    #[test]
    fn test_recognize_rejects_undecodable_input() {
        let err = ready_pipeline().recognize(b"not an image").unwrap_err();
        assert!(matches!(err, RecognizeError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_ready_fails_before_decoding() {
        let cache = Arc::new(ModelCache::new(CountingLoader::default().failing_store(usize::MAX)));
        let pipeline = RecognitionPipeline::new(cache);

        // Garbage bytes would be a decode error if the image were consumed.
        let err = pipeline.recognize(b"not an image").unwrap_err();

        assert!(matches!(err, RecognizeError::NotReady(_)));
        assert!(err.is_retryable());
        let status = pipeline.status();
        assert!(status.detector_ready && status.embedder_ready && !status.store_ready);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let store = EmbeddingStore::from_entries(vec![("dim_red", vec![vec![250.0, 0.0, 0.0]])]).unwrap();
        let caps = capabilities(vec![BoundingBox::new(0, 0, 20, 20)], MeanColorEmbedder::default(), store);

        let strict = recognize_image(&caps, &three_faces(), 0.8).unwrap();
        let loose = recognize_image(&caps, &three_faces(), 10.0).unwrap();

        assert_eq!(labels(&strict), ["unknown"]);
        assert_eq!(labels(&loose), ["dim_red"]);
        assert!((loose[0].distance - 5.0).abs() < 1e-3);
        assert_eq!(ready_pipeline().with_threshold(10.0).threshold(), 10.0);
    }
}
