//! Statistical face-presence test.
//!
//! No model is involved: the score combines intensity spread, contrast, edge
//! density, left–right symmetry and the center/border brightness differential of
//! a normalized grayscale buffer. Hard rejections (blank frame, flat contrast)
//! short-circuit with a zero score.

use crate::types::PixelBuffer;
use serde::Serialize;
use std::fmt;

/// Edge length the presence test runs at.
pub const PRESENCE_RESOLUTION: u32 = 150;

/// Below this intensity variance the frame is treated as blank (walls, lens covers).
const VARIANCE_FLOOR: f64 = 250.0;
/// Below this interquartile range the frame has too little contrast to judge.
const CONTRAST_FLOOR: f64 = 20.0;

const STRONG_EDGE: i32 = 80;
const MEDIUM_EDGE: i32 = 40;

/// Variance at which the spread signal earns full credit.
const VARIANCE_FULL: f64 = 1500.0;
/// Edge ratio where a frame starts to read as texture rather than structure.
const TEXTURE_ONSET: f64 = 0.60;
/// Edge ratio at which intensity spread earns nothing.
const TEXTURE_SATURATION: f64 = 0.85;

/// Per-pixel mirror difference beyond which a pair contributes nothing to symmetry.
const SYMMETRY_TOLERANCE: f64 = 50.0;
/// Central square edge as a fraction of the frame edge.
const CENTER_FRACTION: f64 = 0.6;

// Point budget, sums to 100.
const VARIANCE_POINTS: f64 = 25.0;
const CONTRAST_POINTS: f64 = 20.0;
const STRONG_EDGE_POINTS: f64 = 15.0;
const EDGE_POINTS: f64 = 10.0;
const SYMMETRY_POINTS: f64 = 15.0;
const CENTER_POINTS: f64 = 15.0;

/// Why a buffer was judged not to contain a face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresenceRejection {
    BlankOrUniform,
    PoorContrast,
    LowConfidence { confidence: f64, threshold: f64 },
}

impl fmt::Display for PresenceRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceRejection::BlankOrUniform => f.write_str("blank or uniform image"),
            PresenceRejection::PoorContrast => f.write_str("poor contrast"),
            PresenceRejection::LowConfidence {
                confidence,
                threshold,
            } => write!(
                f,
                "no face-like structure (confidence {confidence:.1} below {threshold:.1})"
            ),
        }
    }
}

/// Raw measurements behind a presence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PresenceSignals {
    pub mean: f64,
    pub variance: f64,
    pub interquartile_range: f64,
    pub strong_edge_ratio: f64,
    pub edge_ratio: f64,
    pub symmetry: f64,
    pub center_border_delta: f64,
}

/// Result of [`detect_presence`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceReport {
    pub present: bool,
    /// 0–100.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<PresenceRejection>,
    pub signals: PresenceSignals,
}

/// Score how plausibly `buffer` contains a face; `present` iff the score reaches `threshold`.
pub fn detect_presence(buffer: &PixelBuffer, threshold: f64) -> PresenceReport {
    let (mean, variance) = mean_and_variance(buffer.pixels());
    let mut signals = PresenceSignals {
        mean,
        variance,
        ..Default::default()
    };

    if variance < VARIANCE_FLOOR {
        return rejected(signals, PresenceRejection::BlankOrUniform);
    }

    signals.interquartile_range = interquartile_range(buffer.pixels());
    if signals.interquartile_range < CONTRAST_FLOOR {
        return rejected(signals, PresenceRejection::PoorContrast);
    }

    let (strong, medium, interior) = edge_buckets(buffer);
    if interior > 0 {
        signals.strong_edge_ratio = strong as f64 / interior as f64;
        signals.edge_ratio = (strong + medium) as f64 / interior as f64;
    }
    signals.symmetry = mirror_symmetry(buffer);
    signals.center_border_delta = center_border_delta(buffer);

    let confidence = score(&signals);
    let present = confidence >= threshold;

    tracing::debug!(
        confidence,
        threshold,
        variance = signals.variance,
        iqr = signals.interquartile_range,
        strong_edges = signals.strong_edge_ratio,
        edges = signals.edge_ratio,
        symmetry = signals.symmetry,
        center_delta = signals.center_border_delta,
        "presence scored"
    );

    PresenceReport {
        present,
        confidence,
        reason: (!present).then_some(PresenceRejection::LowConfidence {
            confidence,
            threshold,
        }),
        signals,
    }
}

fn rejected(signals: PresenceSignals, reason: PresenceRejection) -> PresenceReport {
    tracing::debug!(%reason, variance = signals.variance, "presence rejected");
    PresenceReport {
        present: false,
        confidence: 0.0,
        reason: Some(reason),
        signals,
    }
}

/// Combine signals into a 0–100 score.
///
/// Spread (variance, interquartile range) is credited monotonically, scaled down
/// as edge density approaches that of sensor noise. Edge density itself is
/// banded: a face has sparse edges, dense texture saturates both ratios.
fn score(s: &PresenceSignals) -> f64 {
    let structure = 1.0
        - ((s.edge_ratio - TEXTURE_ONSET) / (TEXTURE_SATURATION - TEXTURE_ONSET)).clamp(0.0, 1.0);
    let variance = (s.variance / VARIANCE_FULL).min(1.0) * VARIANCE_POINTS * structure;
    let contrast = (s.interquartile_range / 80.0).min(1.0) * CONTRAST_POINTS * structure;
    let strong = band(s.strong_edge_ratio, 0.01, 0.20, 0.45) * STRONG_EDGE_POINTS;
    let edges = band(s.edge_ratio, 0.02, 0.35, 0.60) * EDGE_POINTS;
    let symmetry = s.symmetry.clamp(0.0, 1.0) * SYMMETRY_POINTS;
    let center = (s.center_border_delta / 30.0).min(1.0) * CENTER_POINTS;

    (variance + contrast + strong + edges + symmetry + center).clamp(0.0, 100.0)
}

/// Trapezoid membership: ramps 0→1 over `[0, rise_end]`, holds until `fall_start`,
/// falls back to 0 at `fall_end`.
fn band(value: f64, rise_end: f64, fall_start: f64, fall_end: f64) -> f64 {
    if value <= 0.0 || value >= fall_end {
        0.0
    } else if value < rise_end {
        value / rise_end
    } else if value <= fall_start {
        1.0
    } else {
        (fall_end - value) / (fall_end - fall_start)
    }
}

pub(crate) fn mean_and_variance(pixels: &[u8]) -> (f64, f64) {
    if pixels.is_empty() {
        return (0.0, 0.0);
    }
    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
    let variance = pixels
        .iter()
        .map(|&p| (p as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance)
}

/// 75th minus 25th percentile, read off the intensity histogram.
fn interquartile_range(pixels: &[u8]) -> f64 {
    let mut hist = [0usize; 256];
    for &p in pixels {
        hist[p as usize] += 1;
    }
    let percentile = |q: f64| -> usize {
        let rank = ((pixels.len() as f64) * q).ceil().max(1.0) as usize;
        let mut seen = 0;
        for (value, &count) in hist.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return value;
            }
        }
        255
    };
    (percentile(0.75) as f64) - (percentile(0.25) as f64)
}

/// 3×3 Laplacian response `8·c − Σ neighbours` at an interior pixel.
#[inline]
pub(crate) fn laplacian_at(buffer: &PixelBuffer, x: u32, y: u32) -> i32 {
    let mut sum = 0i32;
    for dy in 0..3 {
        for dx in 0..3 {
            if dx == 1 && dy == 1 {
                continue;
            }
            sum += buffer.get(x + dx - 1, y + dy - 1) as i32;
        }
    }
    8 * buffer.get(x, y) as i32 - sum
}

/// Count (strong, medium, interior) Laplacian magnitudes.
fn edge_buckets(buffer: &PixelBuffer) -> (usize, usize, usize) {
    let (w, h) = (buffer.width(), buffer.height());
    if w < 3 || h < 3 {
        return (0, 0, 0);
    }
    let mut strong = 0;
    let mut medium = 0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let magnitude = laplacian_at(buffer, x, y).abs();
            if magnitude > STRONG_EDGE {
                strong += 1;
            } else if magnitude > MEDIUM_EDGE {
                medium += 1;
            }
        }
    }
    (strong, medium, ((w - 2) * (h - 2)) as usize)
}

/// Left half against the mirrored right half, in [0, 1].
fn mirror_symmetry(buffer: &PixelBuffer) -> f64 {
    let (w, h) = (buffer.width(), buffer.height());
    let half = w / 2;
    if half == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for y in 0..h {
        for x in 0..half {
            let left = buffer.get(x, y) as f64;
            let right = buffer.get(w - 1 - x, y) as f64;
            total += (SYMMETRY_TOLERANCE - (left - right).abs()).max(0.0);
        }
    }
    total / (SYMMETRY_TOLERANCE * (half * h) as f64)
}

/// |mean(central square) − mean(surrounding border)|.
fn center_border_delta(buffer: &PixelBuffer) -> f64 {
    let (w, h) = (buffer.width(), buffer.height());
    let cw = ((w as f64) * CENTER_FRACTION).round() as u32;
    let ch = ((h as f64) * CENTER_FRACTION).round() as u32;
    let (x0, y0) = ((w - cw) / 2, (h - ch) / 2);

    let (mut center_sum, mut center_n) = (0u64, 0u64);
    let (mut border_sum, mut border_n) = (0u64, 0u64);
    for y in 0..h {
        for x in 0..w {
            let p = buffer.get(x, y) as u64;
            if x >= x0 && x < x0 + cw && y >= y0 && y < y0 + ch {
                center_sum += p;
                center_n += 1;
            } else {
                border_sum += p;
                border_n += 1;
            }
        }
    }
    if center_n == 0 || border_n == 0 {
        return 0.0;
    }
    (center_sum as f64 / center_n as f64 - border_sum as f64 / border_n as f64).abs()
}
