//! Score fusion and the match decision.

use crate::policy::PolicyTable;
use crate::types::{MetricKind, MetricScore, VerificationResult};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FusionError {
    #[error("no metric scores to fuse")]
    NoMetrics,
}

/// Fuse per-metric scores into a single decision under `policy`.
///
/// Weights are renormalized over the metrics actually present. Consistency is
/// `1 − variance(scores)`; confidence averages it with the combined similarity
/// and selects the match threshold.
pub fn decide(
    metrics: &[MetricScore],
    policy: &PolicyTable,
) -> Result<VerificationResult, FusionError> {
    if metrics.is_empty() {
        return Err(FusionError::NoMetrics);
    }

    let metrics: Vec<MetricScore> = metrics
        .iter()
        .map(|m| MetricScore {
            metric: m.metric,
            similarity: sanitize(m.similarity),
        })
        .collect();

    let kinds: Vec<MetricKind> = metrics.iter().map(|m| m.metric).collect();
    let weights = policy.weights.renormalized(&kinds);

    let weight_total: f64 = weights.iter().map(|(_, w)| w).sum();
    let weighted: f64 = metrics
        .iter()
        .zip(&weights)
        .map(|(m, (_, w))| m.similarity * w)
        .sum();
    let combined_similarity = (weighted / weight_total).clamp(0.0, 1.0);

    let consistency = (1.0 - variance(&metrics)).clamp(0.0, 1.0);
    let confidence = ((combined_similarity + consistency) / 2.0 * 100.0).clamp(0.0, 100.0);
    let threshold_used = policy.threshold.threshold_for(confidence);
    let is_match = combined_similarity >= threshold_used;

    tracing::debug!(
        combined_similarity,
        consistency,
        confidence,
        threshold_used,
        is_match,
        metrics = metrics.len(),
        "fused metric scores"
    );

    Ok(VerificationResult {
        is_match,
        combined_similarity,
        confidence,
        metrics,
        weights,
        threshold_used,
        consistency,
        failed_metrics: Vec::new(),
        presence: None,
        policy_version: policy.version,
    })
}

/// NaN counts as no similarity; everything else is clamped into [0, 1].
fn sanitize(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn variance(metrics: &[MetricScore]) -> f64 {
    let n = metrics.len() as f64;
    let mean = metrics.iter().map(|m| m.similarity).sum::<f64>() / n;
    metrics
        .iter()
        .map(|m| (m.similarity - mean).powi(2))
        .sum::<f64>()
        / n
}
