//! Verification orchestration.
//!
//! [`HeuristicVerifier`] sequences decode → presence → metrics → fusion under a
//! wall-clock budget. [`Verifier`] is the seam for alternative engines (e.g. an
//! adapter to a hosted recognizer); [`FallbackVerifier`] pairs one with the
//! heuristic engine as the always-available fallback.

use crate::fusion::decide;
use crate::metrics::{default_metrics, MetricError, SimilarityMetric};
use crate::normalizer::{DecodeError, DecodedImage, ImagePayload};
use crate::policy::{PolicyTable, PolicyTier};
use crate::presence::{detect_presence, PresenceReport, PRESENCE_RESOLUTION};
use crate::types::{
    FaceSample, ImageSide, MetricFailure, MetricKind, MetricScore, PresenceSummary,
    VerificationResult,
};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default per-call wall-clock budget.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("{side} image could not be decoded: {source}")]
    Decode {
        side: ImageSide,
        #[source]
        source: DecodeError,
    },
    #[error("no similarity metric could be computed ({failures})")]
    NoComparableSignal { failures: String },
    #[error("no face detected in {side} image: {reason}")]
    FaceNotDetected {
        side: ImageSide,
        reason: String,
        /// Presence confidence of the failing side (lowest, if both failed).
        confidence: f64,
    },
    #[error("verification exceeded its {budget_ms} ms budget during {stage}")]
    Timeout { budget_ms: u64, stage: &'static str },
    #[error("verification provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Taxonomy-level classification of a [`VerificationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    FaceNotDetected,
    Timeout,
    ProviderUnavailable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::FaceNotDetected => "face_not_detected",
            FailureKind::Timeout => "timeout",
            FailureKind::ProviderUnavailable => "provider_unavailable",
        }
    }
}

impl VerificationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            VerificationError::Decode { .. } | VerificationError::NoComparableSignal { .. } => {
                FailureKind::Decode
            }
            VerificationError::FaceNotDetected { .. } => FailureKind::FaceNotDetected,
            VerificationError::Timeout { .. } => FailureKind::Timeout,
            VerificationError::ProviderUnavailable(_) => FailureKind::ProviderUnavailable,
        }
    }
}

/// A face verification engine.
pub trait Verifier: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    fn verify(
        &self,
        registered: &ImagePayload,
        captured: &ImagePayload,
        tier: PolicyTier,
    ) -> Result<VerificationResult, VerificationError>;
}

/// Wall-clock budget checked between pipeline stages.
struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn check(&self, stage: &'static str) -> Result<(), VerificationError> {
        if self.started.elapsed() > self.budget {
            tracing::warn!(
                stage,
                budget_ms = self.budget.as_millis() as u64,
                "verification deadline exceeded"
            );
            return Err(VerificationError::Timeout {
                budget_ms: self.budget.as_millis() as u64,
                stage,
            });
        }
        Ok(())
    }
}

/// In-process verifier built from the presence test and the five comparators.
pub struct HeuristicVerifier {
    policy: PolicyTable,
    metrics: Vec<Box<dyn SimilarityMetric>>,
    budget: Duration,
}

impl Default for HeuristicVerifier {
    fn default() -> Self {
        Self::new(PolicyTable::default())
    }
}

impl HeuristicVerifier {
    pub fn new(policy: PolicyTable) -> Self {
        Self {
            policy,
            metrics: default_metrics(),
            budget: DEFAULT_BUDGET,
        }
    }

    /// Replace the comparator set.
    pub fn with_metrics(mut self, metrics: Vec<Box<dyn SimilarityMetric>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    /// Compare a registered face with a freshly captured one.
    pub fn verify_face(
        &self,
        registered: &ImagePayload,
        captured: &ImagePayload,
        tier: PolicyTier,
    ) -> Result<VerificationResult, VerificationError> {
        let deadline = Deadline::start(self.budget);

        let (reg, cap) = rayon::join(
            || DecodedImage::decode(registered),
            || DecodedImage::decode(captured),
        );
        let reg = reg.map_err(|source| VerificationError::Decode {
            side: ImageSide::Registered,
            source,
        })?;
        let cap = cap.map_err(|source| VerificationError::Decode {
            side: ImageSide::Captured,
            source,
        })?;
        deadline.check("decode")?;

        let threshold = self.policy.presence_threshold(tier);
        let ((reg_sample, reg_presence), (cap_sample, cap_presence)) = rayon::join(
            || sample(&reg, threshold),
            || sample(&cap, threshold),
        );
        require_faces(&reg_presence, &cap_presence)?;
        deadline.check("presence")?;

        let (scores, failures) = self.run_metrics(&reg, &cap);
        deadline.check("metrics")?;

        if scores.is_empty() {
            let failures = failures
                .iter()
                .map(|f| format!("{}: {}", f.metric, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(VerificationError::NoComparableSignal { failures });
        }

        let mut result = decide(&scores, &self.policy).map_err(|e| {
            VerificationError::NoComparableSignal {
                failures: e.to_string(),
            }
        })?;
        result.failed_metrics = failures;
        result.presence = Some(PresenceSummary {
            registered: (&reg_sample).into(),
            captured: (&cap_sample).into(),
        });

        tracing::info!(
            is_match = result.is_match,
            similarity = result.combined_similarity,
            confidence = result.confidence,
            threshold = result.threshold_used,
            failed = result.failed_metrics.len(),
            %tier,
            "face verification decided"
        );
        Ok(result)
    }

    /// Fan out every comparator; failures are recorded, not propagated.
    fn run_metrics(
        &self,
        registered: &DecodedImage,
        captured: &DecodedImage,
    ) -> (Vec<MetricScore>, Vec<MetricFailure>) {
        let outcomes: Vec<(MetricKind, Result<f64, MetricError>)> = self
            .metrics
            .par_iter()
            .map(|metric| (metric.kind(), metric.compare(registered, captured)))
            .collect();

        let mut scores = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (metric, outcome) in outcomes {
            match outcome {
                Ok(similarity) => {
                    tracing::debug!(%metric, similarity, "metric computed");
                    scores.push(MetricScore { metric, similarity });
                }
                Err(err) => {
                    tracing::warn!(%metric, error = %err, "metric failed; dropping from fusion");
                    failures.push(MetricFailure {
                        metric,
                        error: err.to_string(),
                    });
                }
            }
        }
        (scores, failures)
    }
}

/// Normalize to the presence resolution and score it.
fn sample(image: &DecodedImage, threshold: f64) -> (FaceSample, PresenceReport) {
    let mut sample = FaceSample {
        buffer: image.normalize(PRESENCE_RESOLUTION),
        source_width: image.width(),
        source_height: image.height(),
        presence_confidence: 0.0,
    };
    let presence = detect_presence(&sample.buffer, threshold);
    sample.presence_confidence = presence.confidence;
    (sample, presence)
}

/// Fail fast if either side lacks a face, naming the side(s).
fn require_faces(
    registered: &PresenceReport,
    captured: &PresenceReport,
) -> Result<(), VerificationError> {
    let reason_of = |r: &PresenceReport| {
        r.reason
            .map(|reason| reason.to_string())
            .unwrap_or_else(|| "no face detected".to_string())
    };
    let failure = match (registered.present, captured.present) {
        (true, true) => return Ok(()),
        (false, true) => (ImageSide::Registered, reason_of(registered), registered.confidence),
        (true, false) => (ImageSide::Captured, reason_of(captured), captured.confidence),
        (false, false) => (
            ImageSide::Both,
            format!("registered: {}; captured: {}", reason_of(registered), reason_of(captured)),
            registered.confidence.min(captured.confidence),
        ),
    };
    tracing::info!(
        side = %failure.0,
        reason = %failure.1,
        confidence = failure.2,
        "face not detected"
    );
    Err(VerificationError::FaceNotDetected {
        side: failure.0,
        reason: failure.1,
        confidence: failure.2,
    })
}

impl Verifier for HeuristicVerifier {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn verify(
        &self,
        registered: &ImagePayload,
        captured: &ImagePayload,
        tier: PolicyTier,
    ) -> Result<VerificationResult, VerificationError> {
        self.verify_face(registered, captured, tier)
    }
}

/// Try `primary` first; use the in-process engine when it is unavailable.
///
/// Only [`VerificationError::ProviderUnavailable`] triggers the fallback: any
/// answer the primary did give (including "no face") stands.
pub struct FallbackVerifier<P> {
    primary: P,
    fallback: HeuristicVerifier,
}

impl<P: Verifier> FallbackVerifier<P> {
    pub fn new(primary: P, fallback: HeuristicVerifier) -> Self {
        Self { primary, fallback }
    }
}

impl<P: Verifier> Verifier for FallbackVerifier<P> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn verify(
        &self,
        registered: &ImagePayload,
        captured: &ImagePayload,
        tier: PolicyTier,
    ) -> Result<VerificationResult, VerificationError> {
        match self.primary.verify(registered, captured, tier) {
            Err(VerificationError::ProviderUnavailable(why)) => {
                tracing::warn!(
                    provider = self.primary.name(),
                    reason = %why,
                    "primary verifier unavailable; using heuristic engine"
                );
                self.fallback.verify_face(registered, captured, tier)
            }
            other => other,
        }
    }
}

/// Verify with the default heuristic engine and policy.
pub fn verify_face(
    registered: &ImagePayload,
    captured: &ImagePayload,
    tier: PolicyTier,
) -> Result<VerificationResult, VerificationError> {
    HeuristicVerifier::default().verify_face(registered, captured, tier)
}
