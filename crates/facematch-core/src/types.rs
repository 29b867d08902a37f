use crate::store::EmbeddingStore;
use serde::{Serialize, Serializer};
use std::fmt;

/// Default Euclidean distance below which a probe is declared a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.8;

/// Face embedding vector (512-dimensional for FaceNet).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Raw detector output in image pixel coordinates.
///
/// May extend past the image edges; see [`BoundingBox::clip`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    /// Clip to `[0, image_width) x [0, image_height)`.
    ///
    /// The origin is clamped first and the far edge measured from the clamped
    /// origin, so a box hanging off the top or left keeps its extent and slides
    /// inward. Returns `None` when the result has no area.
    pub fn clip(&self, image_width: u32, image_height: u32) -> Option<FaceRegion> {
        let x1 = i64::from(self.x).max(0);
        let y1 = i64::from(self.y).max(0);
        let x2 = (x1 + i64::from(self.width)).min(i64::from(image_width));
        let y2 = (y1 + i64::from(self.height)).min(i64::from(image_height));

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(FaceRegion {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

/// A face box clipped to the image it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn x2(&self) -> u32 {
        self.x + self.width
    }

    pub fn y2(&self) -> u32 {
        self.y + self.height
    }
}

/// Outcome label for one face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchLabel {
    /// Closest enrolled identity within the threshold.
    Identity(String),
    /// No reference embedding was close enough.
    Unknown,
    /// The face could not be cropped or embedded.
    Error,
}

impl MatchLabel {
    pub fn as_str(&self) -> &str {
        match self {
            MatchLabel::Identity(label) => label,
            MatchLabel::Unknown => "unknown",
            MatchLabel::Error => "error",
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, MatchLabel::Identity(_))
    }
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MatchLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Nearest-neighbor decision for a single probe.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub label: MatchLabel,
    /// Euclidean distance to the matched reference, `+inf` when unmatched.
    pub distance: f32,
}

impl FaceMatch {
    pub fn unknown() -> Self {
        Self {
            label: MatchLabel::Unknown,
            distance: f32::INFINITY,
        }
    }
}

/// Recognition result for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub label: MatchLabel,
    /// Serialized as `null` when infinite.
    pub distance: f32,
    pub region: FaceRegion,
}

impl MatchResult {
    pub fn from_match(face_match: FaceMatch, region: FaceRegion) -> Self {
        Self {
            label: face_match.label,
            distance: face_match.distance,
            region,
        }
    }

    pub fn error(region: FaceRegion) -> Self {
        Self {
            label: MatchLabel::Error,
            distance: f32::INFINITY,
            region,
        }
    }
}

/// Strategy for comparing a probe embedding against the enrolled store.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, store: &EmbeddingStore, threshold: f32) -> FaceMatch;
}

/// Linear-scan Euclidean nearest neighbor.
///
/// Visits identities in store order and each identity's embeddings in stored
/// order. A candidate wins only if it is strictly closer than the current best
/// and strictly closer than the threshold, so the first of several equidistant
/// references keeps the match and a reference exactly at the threshold never
/// matches.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, store: &EmbeddingStore, threshold: f32) -> FaceMatch {
        let mut best = FaceMatch::unknown();

        for (label, references) in store.iter() {
            for reference in references {
                let distance = probe.euclidean_distance(reference);
                if distance < best.distance && distance < threshold {
                    best = FaceMatch {
                        label: MatchLabel::Identity(label.to_string()),
                        distance,
                    };
                }
            }
        }

        best
    }
}
