//! Clock-in checkpoint: face verification and geofence in one decision.

use crate::geofence::{check_location, GeoPoint, GeofenceResult, Location};
use crate::normalizer::ImagePayload;
use crate::policy::PolicyTier;
use crate::types::{ImageSide, VerificationResult};
use crate::verifier::{VerificationError, Verifier};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    pub registered: ImagePayload,
    pub captured: ImagePayload,
    pub tier: PolicyTier,
    pub point: Option<GeoPoint>,
    pub postcode: Option<String>,
}

/// What the person at the checkpoint has to do next.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckpointOutcome {
    Accepted,
    /// Retake the photo.
    NoFace { side: ImageSide, reason: String },
    /// A face was found but it is not the registered person.
    FaceMismatch,
    /// Move to a permitted site.
    LocationDenied { reason: String },
    Failed { message: String },
}

impl fmt::Display for CheckpointOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointOutcome::Accepted => f.write_str("accepted"),
            CheckpointOutcome::NoFace { side, reason } => {
                write!(f, "no face in {side} image: {reason}")
            }
            CheckpointOutcome::FaceMismatch => f.write_str("face does not match"),
            CheckpointOutcome::LocationDenied { reason } => write!(f, "location denied: {reason}"),
            CheckpointOutcome::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReport {
    #[serde(flatten)]
    pub outcome: CheckpointOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// Absent when geofencing is disabled (empty allow-list).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeofenceResult>,
}

impl CheckpointReport {
    pub fn accepted(&self) -> bool {
        self.outcome == CheckpointOutcome::Accepted
    }
}

/// Run face verification and the geofence check side by side.
///
/// An empty `allowed` list disables geofencing. Face problems take precedence
/// over location problems in the reported outcome.
pub fn verify_checkpoint(
    verifier: &dyn Verifier,
    request: &CheckpointRequest,
    allowed: &[Location],
) -> CheckpointReport {
    let (face, location) = rayon::join(
        || verifier.verify(&request.registered, &request.captured, request.tier),
        || {
            (!allowed.is_empty())
                .then(|| check_location(request.point, request.postcode.as_deref(), allowed))
        },
    );

    let (outcome, verification) = match face {
        Err(err) => (classify(&err), None),
        Ok(result) if !result.is_match => (CheckpointOutcome::FaceMismatch, Some(result)),
        Ok(result) => {
            let outcome = match &location {
                Some(geo) if !geo.allowed => CheckpointOutcome::LocationDenied {
                    reason: geo.reason.to_string(),
                },
                _ => CheckpointOutcome::Accepted,
            };
            (outcome, Some(result))
        }
    };

    tracing::info!(verifier = verifier.name(), %outcome, "checkpoint decided");
    CheckpointReport {
        outcome,
        verification,
        location,
    }
}

fn classify(err: &VerificationError) -> CheckpointOutcome {
    match err {
        VerificationError::FaceNotDetected { side, reason, .. } => CheckpointOutcome::NoFace {
            side: *side,
            reason: reason.clone(),
        },
        other => CheckpointOutcome::Failed {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricKind, MetricScore};

    struct Canned(fn() -> Result<VerificationResult, VerificationError>);

    impl Verifier for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn verify(
            &self,
            _: &ImagePayload,
            _: &ImagePayload,
            _: PolicyTier,
        ) -> Result<VerificationResult, VerificationError> {
            (self.0)()
        }
    }

    fn result(is_match: bool) -> VerificationResult {
        VerificationResult {
            is_match,
            combined_similarity: if is_match { 0.9 } else { 0.3 },
            confidence: 80.0,
            metrics: vec![MetricScore {
                metric: MetricKind::Pixel,
                similarity: 0.9,
            }],
            weights: vec![(MetricKind::Pixel, 1.0)],
            threshold_used: 0.6,
            consistency: 1.0,
            failed_metrics: Vec::new(),
            presence: None,
            policy_version: 1,
        }
    }

    fn office() -> Vec<Location> {
        vec![Location {
            id: "office".into(),
            center: Some(GeoPoint {
                latitude: 51.5,
                longitude: -0.12,
            }),
            radius_meters: 100,
            postcode: "SW1A 1AA".into(),
        }]
    }

    fn request(point: Option<GeoPoint>) -> CheckpointRequest {
        CheckpointRequest {
            registered: ImagePayload::Encoded(Vec::new()),
            captured: ImagePayload::Encoded(Vec::new()),
            tier: PolicyTier::Standard,
            point,
            postcode: None,
        }
    }

    const AT_OFFICE: GeoPoint = GeoPoint {
        latitude: 51.5,
        longitude: -0.12,
    };
    const FAR_AWAY: GeoPoint = GeoPoint {
        latitude: 52.5,
        longitude: -0.12,
    };

    #[test]
    fn test_accepted() {
        let verifier = Canned(|| Ok(result(true)));
        let report = verify_checkpoint(&verifier, &request(Some(AT_OFFICE)), &office());
        assert!(report.accepted());
        assert!(report.location.unwrap().allowed);
    }

    #[test]
    fn test_location_denied() {
        let verifier = Canned(|| Ok(result(true)));
        let report = verify_checkpoint(&verifier, &request(Some(FAR_AWAY)), &office());
        match report.outcome {
            CheckpointOutcome::LocationDenied { reason } => {
                assert!(reason.ends_with("m outside the permitted radius"))
            }
            other => panic!("expected LocationDenied, got {other:?}"),
        }
    }

    #[test]
    fn test_face_problems_take_precedence() {
        let verifier = Canned(|| Ok(result(false)));
        let mismatch = verify_checkpoint(&verifier, &request(Some(FAR_AWAY)), &office());
        assert_eq!(mismatch.outcome, CheckpointOutcome::FaceMismatch);

        let no_face = verify_checkpoint(
            &Canned(|| {
                Err(VerificationError::FaceNotDetected {
                    side: ImageSide::Captured,
                    reason: "blank or uniform image".into(),
                    confidence: 0.0,
                })
            }),
            &request(Some(FAR_AWAY)),
            &office(),
        );
        assert_eq!(
            no_face.outcome,
            CheckpointOutcome::NoFace {
                side: ImageSide::Captured,
                reason: "blank or uniform image".into()
            }
        );
        assert!(no_face.verification.is_none());
    }

    #[test]
    fn test_timeout_is_failed() {
        let report = verify_checkpoint(
            &Canned(|| Err(VerificationError::Timeout { budget_ms: 5000, stage: "metrics" })),
            &request(None),
            &[],
        );
        assert!(matches!(report.outcome, CheckpointOutcome::Failed { .. }));
        assert!(report.location.is_none());
    }

    #[test]
    fn test_report_serializes_flat_outcome() {
        let report = verify_checkpoint(&Canned(|| Ok(result(false))), &request(None), &[]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "face_mismatch");
        assert!(json.get("location").is_none());
        assert_eq!(json["verification"]["is_match"], false);
    }
}
