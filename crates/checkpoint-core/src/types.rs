use serde::{Deserialize, Serialize};
use std::fmt;

/// Grayscale intensity grid, row-major, one byte per pixel.
///
/// Immutable once built: every accessor borrows, nothing hands out `&mut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw grayscale bytes. Returns `None` if `data` is not `width * height` long
    /// or either dimension is zero.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || data.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self { width, height, data })
    }

    /// Internal constructor for buffers whose length is correct by construction.
    pub(crate) fn sized(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize));
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Intensity at (x, y). Panics on out-of-range coordinates, like slice indexing.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mean intensity (0.0–255.0).
    pub fn mean(&self) -> f64 {
        self.data.iter().map(|&p| p as f64).sum::<f64>() / self.data.len() as f64
    }
}

/// Interleaved RGB grid, used only by the regional feature comparator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ColorBuffer {
    /// Wrap interleaved RGB bytes (`width * height * 3` long).
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || data.len() != (width as usize) * (height as usize) * 3 {
            return None;
        }
        Some(Self { width, height, data })
    }

    pub(crate) fn sized(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize) * 3);
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGB triple at (x, y).
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// A normalized face image together with its provenance and presence confidence.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub buffer: PixelBuffer,
    pub source_width: u32,
    pub source_height: u32,
    /// Presence confidence (0–100).
    pub presence_confidence: f64,
}

/// Which of the two images a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSide {
    Registered,
    Captured,
    Both,
}

impl fmt::Display for ImageSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageSide::Registered => "registered",
            ImageSide::Captured => "captured",
            ImageSide::Both => "registered and captured",
        })
    }
}

/// Identifier of one of the five comparators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Pixel,
    Histogram,
    Edge,
    Structural,
    Features,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Pixel,
        MetricKind::Histogram,
        MetricKind::Edge,
        MetricKind::Structural,
        MetricKind::Features,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Pixel => "pixel",
            MetricKind::Histogram => "histogram",
            MetricKind::Edge => "edge",
            MetricKind::Structural => "structural",
            MetricKind::Features => "features",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One comparator's similarity in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub metric: MetricKind,
    pub similarity: f64,
}

/// A comparator that failed and was dropped from fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFailure {
    pub metric: MetricKind,
    pub error: String,
}

/// Presence confidence and source size of one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplePresence {
    pub confidence: f64,
    pub source_width: u32,
    pub source_height: u32,
}

impl From<&FaceSample> for SamplePresence {
    fn from(sample: &FaceSample) -> Self {
        Self {
            confidence: sample.presence_confidence,
            source_width: sample.source_width,
            source_height: sample.source_height,
        }
    }
}

/// Presence of both images that reached the comparison stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PresenceSummary {
    pub registered: SamplePresence,
    pub captured: SamplePresence,
}

/// Outcome of comparing a registered face against a captured one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub is_match: bool,
    /// Weighted fusion of `metrics`, in [0, 1].
    pub combined_similarity: f64,
    /// 0–100.
    pub confidence: f64,
    /// One entry per comparator that computed successfully.
    pub metrics: Vec<MetricScore>,
    /// Weights actually applied, renormalized over `metrics`.
    pub weights: Vec<(MetricKind, f64)>,
    pub threshold_used: f64,
    /// 1 − variance of the metric scores, in [0, 1].
    pub consistency: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_metrics: Vec<MetricFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceSummary>,
    pub policy_version: u32,
}

impl VerificationResult {
    /// Score of a single metric, if it computed.
    pub fn metric(&self, kind: MetricKind) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.metric == kind)
            .map(|m| m.similarity)
    }
}
