//! Pairwise similarity comparators.
//!
//! Each comparator is a pure function of two equally sized buffers returning a
//! score in [0, 1], commutative in its arguments. [`SimilarityMetric`] wraps them
//! with the working resolution each one normalizes to.

use crate::normalizer::DecodedImage;
use crate::types::{ColorBuffer, MetricKind, PixelBuffer};
use thiserror::Error;

// --- Working resolutions, chosen per metric as a cost/quality trade-off ---
const PIXEL_RESOLUTION: u32 = 128;
const HISTOGRAM_RESOLUTION: u32 = 150;
const EDGE_RESOLUTION: u32 = 128;
const STRUCTURAL_RESOLUTION: u32 = 64;
const FEATURE_RESOLUTION: u32 = 100;

// SSIM stabilizers for 8-bit data.
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Facial regions as fractions of the frame: (row_start, row_end, col_start, col_end, weight).
const FACE_REGIONS: [(f64, f64, f64, f64, f64); 3] = [
    (0.20, 0.45, 0.15, 0.85, 0.4), // eyes
    (0.45, 0.65, 0.30, 0.70, 0.3), // nose
    (0.65, 0.85, 0.25, 0.75, 0.3), // mouth
];

#[derive(Error, Debug)]
pub enum MetricError {
    #[error("dimension mismatch: {left_width}x{left_height} vs {right_width}x{right_height}")]
    DimensionMismatch {
        left_width: u32,
        left_height: u32,
        right_width: u32,
        right_height: u32,
    },
    #[error("buffer {width}x{height} too small for this metric")]
    TooSmall { width: u32, height: u32 },
    #[error("metric failed: {0}")]
    Failed(String),
}

fn check_dims(a: (u32, u32), b: (u32, u32)) -> Result<(), MetricError> {
    if a != b {
        return Err(MetricError::DimensionMismatch {
            left_width: a.0,
            left_height: a.1,
            right_width: b.0,
            right_height: b.1,
        });
    }
    Ok(())
}

fn dims(buf: &PixelBuffer) -> (u32, u32) {
    (buf.width(), buf.height())
}

/// `1 − mean|a − b| / 255`.
pub fn pixel_similarity(a: &PixelBuffer, b: &PixelBuffer) -> Result<f64, MetricError> {
    check_dims(dims(a), dims(b))?;
    let total: u64 = a
        .pixels()
        .iter()
        .zip(b.pixels())
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();
    let mean_diff = total as f64 / (a.len() as f64 * 255.0);
    Ok((1.0 - mean_diff).clamp(0.0, 1.0))
}

/// Bhattacharyya coefficient of the two 256-bin intensity histograms.
///
/// Computed on raw counts, `Σ√(c₁c₂) / √(n₁n₂)`, so identical inputs land on
/// exactly 1.0.
pub fn histogram_similarity(a: &PixelBuffer, b: &PixelBuffer) -> Result<f64, MetricError> {
    check_dims(dims(a), dims(b))?;
    let ha = histogram(a.pixels());
    let hb = histogram(b.pixels());
    let overlap: f64 = ha
        .iter()
        .zip(hb.iter())
        .map(|(&x, &y)| ((x as f64) * (y as f64)).sqrt())
        .sum();
    let norm = ((a.len() as f64) * (b.len() as f64)).sqrt();
    Ok((overlap / norm).clamp(0.0, 1.0))
}

fn histogram(pixels: &[u8]) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &p in pixels {
        hist[p as usize] += 1;
    }
    hist
}

/// Horizontal-Sobel edge agreement: `Σ min(e₁, e₂) / Σ max(e₁, e₂)`.
///
/// Two edge-free buffers agree completely.
pub fn edge_similarity(a: &PixelBuffer, b: &PixelBuffer) -> Result<f64, MetricError> {
    check_dims(dims(a), dims(b))?;
    if a.width() < 3 || a.height() < 3 {
        return Err(MetricError::TooSmall {
            width: a.width(),
            height: a.height(),
        });
    }
    let ea = sobel_x(a);
    let eb = sobel_x(b);

    let mut min_sum = 0u64;
    let mut max_sum = 0u64;
    for (&x, &y) in ea.iter().zip(eb.iter()) {
        min_sum += x.min(y) as u64;
        max_sum += x.max(y) as u64;
    }
    if max_sum == 0 {
        return Ok(1.0);
    }
    Ok(min_sum as f64 / max_sum as f64)
}

/// |Gx| over interior pixels.
fn sobel_x(buf: &PixelBuffer) -> Vec<u32> {
    const KERNEL: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
    let (w, h) = (buf.width(), buf.height());
    let mut out = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut g = 0i32;
            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, &k) in row.iter().enumerate() {
                    g += k * buf.get(x + kx as u32 - 1, y + ky as u32 - 1) as i32;
                }
            }
            out.push(g.unsigned_abs());
        }
    }
    out
}

/// Single-window SSIM over the whole buffer, clamped to [0, 1].
pub fn structural_similarity(a: &PixelBuffer, b: &PixelBuffer) -> Result<f64, MetricError> {
    check_dims(dims(a), dims(b))?;
    let n = a.len() as f64;
    let mean_a = a.mean();
    let mean_b = b.mean();

    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut covar = 0.0;
    for (&x, &y) in a.pixels().iter().zip(b.pixels()) {
        let da = x as f64 - mean_a;
        let db = y as f64 - mean_b;
        var_a += da * da;
        var_b += db * db;
        covar += da * db;
    }
    var_a /= n;
    var_b /= n;
    covar /= n;

    let numerator = (2.0 * mean_a * mean_b + SSIM_C1) * (2.0 * covar + SSIM_C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + SSIM_C1) * (var_a + var_b + SSIM_C2);
    Ok((numerator / denominator).clamp(0.0, 1.0))
}

/// Weighted agreement of mean colour and brightness over eye, nose and mouth bands.
pub fn feature_similarity(a: &ColorBuffer, b: &ColorBuffer) -> Result<f64, MetricError> {
    check_dims((a.width(), a.height()), (b.width(), b.height()))?;
    let (w, h) = (a.width(), a.height());

    let mut total = 0.0;
    let mut weight_sum = 0.0;
    for &(r0, r1, c0, c1, weight) in &FACE_REGIONS {
        let rows = frac(r0, h)..frac(r1, h);
        let cols = frac(c0, w)..frac(c1, w);
        if rows.is_empty() || cols.is_empty() {
            return Err(MetricError::TooSmall { width: w, height: h });
        }
        let ma = region_means(a, rows.clone(), cols.clone());
        let mb = region_means(b, rows, cols);
        let diff: f64 = ma.iter().zip(mb.iter()).map(|(x, y)| (x - y).abs()).sum();
        total += weight * (1.0 - diff / (4.0 * 255.0));
        weight_sum += weight;
    }
    Ok((total / weight_sum).clamp(0.0, 1.0))
}

fn frac(f: f64, len: u32) -> u32 {
    ((len as f64) * f).round() as u32
}

/// Mean [R, G, B, luma] over a rectangle.
fn region_means(
    buf: &ColorBuffer,
    rows: std::ops::Range<u32>,
    cols: std::ops::Range<u32>,
) -> [f64; 4] {
    let mut sums = [0.0f64; 3];
    let mut n = 0.0;
    for y in rows {
        for x in cols.clone() {
            let px = buf.get(x, y);
            for c in 0..3 {
                sums[c] += px[c] as f64;
            }
            n += 1.0;
        }
    }
    let [r, g, b] = sums.map(|s| s / n);
    [r, g, b, 0.299 * r + 0.587 * g + 0.114 * b]
}

/// One comparator, bound to the resolution it works at.
pub trait SimilarityMetric: Send + Sync {
    fn kind(&self) -> MetricKind;

    /// Similarity in [0, 1] between two decoded images.
    fn compare(
        &self,
        registered: &DecodedImage,
        captured: &DecodedImage,
    ) -> Result<f64, MetricError>;
}

/// Grayscale comparator applied at a fixed working resolution.
pub struct GrayMetric {
    kind: MetricKind,
    resolution: u32,
    compare: fn(&PixelBuffer, &PixelBuffer) -> Result<f64, MetricError>,
}

impl GrayMetric {
    pub fn pixel() -> Self {
        Self {
            kind: MetricKind::Pixel,
            resolution: PIXEL_RESOLUTION,
            compare: pixel_similarity,
        }
    }

    pub fn histogram() -> Self {
        Self {
            kind: MetricKind::Histogram,
            resolution: HISTOGRAM_RESOLUTION,
            compare: histogram_similarity,
        }
    }

    pub fn edge() -> Self {
        Self {
            kind: MetricKind::Edge,
            resolution: EDGE_RESOLUTION,
            compare: edge_similarity,
        }
    }

    pub fn structural() -> Self {
        Self {
            kind: MetricKind::Structural,
            resolution: STRUCTURAL_RESOLUTION,
            compare: structural_similarity,
        }
    }
}

impl SimilarityMetric for GrayMetric {
    fn kind(&self) -> MetricKind {
        self.kind
    }

    fn compare(
        &self,
        registered: &DecodedImage,
        captured: &DecodedImage,
    ) -> Result<f64, MetricError> {
        (self.compare)(
            &registered.normalize(self.resolution),
            &captured.normalize(self.resolution),
        )
    }
}

/// Regional colour comparator at its working resolution.
pub struct FeatureMetric;

impl SimilarityMetric for FeatureMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Features
    }

    fn compare(
        &self,
        registered: &DecodedImage,
        captured: &DecodedImage,
    ) -> Result<f64, MetricError> {
        feature_similarity(
            &registered.normalize_color(FEATURE_RESOLUTION),
            &captured.normalize_color(FEATURE_RESOLUTION),
        )
    }
}

/// The five standard comparators.
pub fn default_metrics() -> Vec<Box<dyn SimilarityMetric>> {
    vec![
        Box::new(GrayMetric::pixel()),
        Box::new(GrayMetric::histogram()),
        Box::new(GrayMetric::edge()),
        Box::new(GrayMetric::structural()),
        Box::new(FeatureMetric),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(size: u32, f: impl Fn(u32, u32) -> u8) -> PixelBuffer {
        let data = (0..size * size).map(|i| f(i % size, i / size)).collect();
        PixelBuffer::from_raw(size, size, data).unwrap()
    }

    fn color(size: u32, f: impl Fn(u32, u32) -> [u8; 3]) -> ColorBuffer {
        let data = (0..size * size).flat_map(|i| f(i % size, i / size)).collect();
        ColorBuffer::from_raw(size, size, data).unwrap()
    }

    fn pattern(x: u32, y: u32) -> u8 {
        ((x * 13 + y * 7) % 200 + 20) as u8
    }

    #[test]
    fn test_identical_buffers_saturate() {
        let a = gray(64, pattern);
        assert_eq!(pixel_similarity(&a, &a).unwrap(), 1.0);
        assert_eq!(histogram_similarity(&a, &a).unwrap(), 1.0);
        assert_eq!(edge_similarity(&a, &a).unwrap(), 1.0);
        assert_eq!(structural_similarity(&a, &a).unwrap(), 1.0);

        let c = color(100, |x, y| [pattern(x, y), pattern(y, x), 90]);
        assert_eq!(feature_similarity(&c, &c).unwrap(), 1.0);
    }

    #[test]
    fn test_pixel_similarity_extremes() {
        let black = gray(10, |_, _| 0);
        let white = gray(10, |_, _| 255);
        assert_eq!(pixel_similarity(&black, &white).unwrap(), 0.0);
        let mid = gray(10, |_, _| 51);
        assert!((pixel_similarity(&black, &mid).unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_disjoint_is_zero() {
        let dark = gray(16, |x, _| (x % 4) as u8);
        let bright = gray(16, |x, _| 200 + (x % 4) as u8);
        assert_eq!(histogram_similarity(&dark, &bright).unwrap(), 0.0);
    }

    #[test]
    fn test_histogram_ignores_spatial_shift() {
        let a = gray(32, |x, _| if x < 16 { 10 } else { 240 });
        let b = gray(32, |x, _| if x >= 16 { 10 } else { 240 });
        assert!((histogram_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!(pixel_similarity(&a, &b).unwrap() < 0.2);
    }

    #[test]
    fn test_edge_similarity_flat_buffers_agree() {
        let a = gray(16, |_, _| 30);
        let b = gray(16, |_, _| 200);
        assert_eq!(edge_similarity(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn test_edge_similarity_flat_vs_edges() {
        let flat = gray(16, |_, _| 100);
        let stripes = gray(16, |x, _| if x % 2 == 0 { 0 } else { 255 });
        assert_eq!(edge_similarity(&flat, &stripes).unwrap(), 0.0);
    }

    #[test]
    fn test_edge_similarity_brightness_invariant() {
        let a = gray(32, pattern);
        let b = gray(32, |x, y| pattern(x, y) + 20);
        assert_eq!(edge_similarity(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn test_structural_tolerates_brightness_shift() {
        let a = gray(64, pattern);
        let b = gray(64, |x, y| pattern(x, y) + 13);
        let s = structural_similarity(&a, &b).unwrap();
        assert!(s > 0.95 && s < 1.0, "ssim = {s}");
    }

    #[test]
    fn test_structural_inverted_clamps_to_zero() {
        let a = gray(64, pattern);
        let b = gray(64, |x, y| 255 - pattern(x, y));
        assert_eq!(structural_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_feature_similarity_color_difference() {
        let red = color(100, |_, _| [255, 0, 0]);
        let blue = color(100, |_, _| [0, 0, 255]);
        let s = feature_similarity(&red, &blue).unwrap();
        // |ΔR| = |ΔB| = 255, ΔG = 0, Δluma = 255·(0.299 − 0.114)
        let expected = 1.0 - (510.0 + 255.0 * 0.185) / 1020.0;
        assert!((s - expected).abs() < 1e-9, "got {s}, expected {expected}");
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = gray(10, |_, _| 0);
        let b = gray(12, |_, _| 0);
        assert!(matches!(
            pixel_similarity(&a, &b),
            Err(MetricError::DimensionMismatch { left_width: 10, right_width: 12, .. })
        ));
        assert!(histogram_similarity(&a, &b).is_err());
        assert!(edge_similarity(&a, &b).is_err());
        assert!(structural_similarity(&a, &b).is_err());
    }

    #[test]
    fn test_default_metrics_cover_every_kind() {
        let kinds: Vec<MetricKind> = default_metrics().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, MetricKind::ALL.to_vec());
    }
}
