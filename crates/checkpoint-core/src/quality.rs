//! Capture quality scoring for registration photos.

use crate::normalizer::{DecodeError, DecodedImage, ImagePayload};
use crate::policy::{PolicyTable, PolicyTier};
use crate::presence::{self, detect_presence, PresenceReport, PRESENCE_RESOLUTION};
use crate::types::PixelBuffer;
use serde::Serialize;

const MIN_BRIGHTNESS_SCORE: f64 = 40.0;
const MIN_SHARPNESS_SCORE: f64 = 30.0;
const MIN_QUALITY_SCORE: f64 = 50.0;

/// Brightness, sharpness and presence folded into a registration verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub is_valid: bool,
    pub message: String,
    /// 0–100, peaks at mid-gray exposure.
    pub brightness_score: f64,
    /// 0–100, from Laplacian variance.
    pub sharpness_score: f64,
    pub quality_score: f64,
    pub presence: PresenceReport,
}

/// Score an already-normalized buffer given its presence report.
pub fn assess_quality(buffer: &PixelBuffer, presence: &PresenceReport) -> QualityReport {
    let brightness_score = (100.0 - (buffer.mean() - 128.0).abs() * 0.78).clamp(0.0, 100.0);
    let sharpness_score = (laplacian_variance(buffer) / 10.0).min(100.0);
    let quality_score =
        brightness_score * 0.3 + sharpness_score * 0.4 + presence.confidence * 0.3;

    let is_valid = presence.present
        && brightness_score > MIN_BRIGHTNESS_SCORE
        && sharpness_score > MIN_SHARPNESS_SCORE
        && quality_score > MIN_QUALITY_SCORE;

    let message = if is_valid {
        "High-quality face image suitable for registration".to_string()
    } else {
        format!(
            "Image quality issues detected \
             (Brightness: {brightness_score:.1}, Sharpness: {sharpness_score:.1}, Presence: {:.1})",
            presence.confidence
        )
    };

    QualityReport {
        is_valid,
        message,
        brightness_score,
        sharpness_score,
        quality_score,
        presence: presence.clone(),
    }
}

/// Decode a candidate registration photo and assess it at `tier`.
pub fn assess_image(
    payload: &ImagePayload,
    tier: PolicyTier,
    policy: &PolicyTable,
) -> Result<QualityReport, DecodeError> {
    let buffer = DecodedImage::decode(payload)?.normalize(PRESENCE_RESOLUTION);
    let presence = detect_presence(&buffer, policy.presence_threshold(tier));
    let report = assess_quality(&buffer, &presence);
    tracing::info!(
        valid = report.is_valid,
        quality = report.quality_score,
        presence = report.presence.confidence,
        %tier,
        "registration image assessed"
    );
    Ok(report)
}

fn laplacian_variance(buffer: &PixelBuffer) -> f64 {
    let (w, h) = (buffer.width(), buffer.height());
    if w < 3 || h < 3 {
        return 0.0;
    }
    let n = ((w - 2) * (h - 2)) as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let v = presence::laplacian_at(buffer, x, y) as f64;
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(size: u32, f: impl Fn(u32, u32) -> u8) -> PixelBuffer {
        let data = (0..size * size).map(|i| f(i % size, i / size)).collect();
        PixelBuffer::from_raw(size, size, data).unwrap()
    }

    #[test]
    fn test_blank_image_is_invalid() {
        let buf = buffer(150, |_, _| 128);
        let presence = detect_presence(&buf, 35.0);
        let report = assess_quality(&buf, &presence);
        assert!(!report.is_valid);
        assert_eq!(report.brightness_score, 100.0);
        assert_eq!(report.sharpness_score, 0.0);
        assert!(report.message.starts_with("Image quality issues detected"));
    }

    #[test]
    fn test_dark_image_scores_low_brightness() {
        let buf = buffer(150, |x, _| if x % 2 == 0 { 0 } else { 20 });
        let presence = detect_presence(&buf, 35.0);
        let report = assess_quality(&buf, &presence);
        assert!(report.brightness_score < MIN_BRIGHTNESS_SCORE);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_laplacian_variance_flat_is_zero() {
        assert_eq!(laplacian_variance(&buffer(20, |_, _| 40)), 0.0);
        assert!(laplacian_variance(&buffer(20, |x, y| ((x + y) % 2 * 255) as u8)) > 0.0);
    }
}
