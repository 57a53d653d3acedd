//! checkpoint-core — Face verification and geofence decisions for attendance checkpoints.
//!
//! Heuristic in-process engine: a structural face-presence test followed by
//! five image-similarity comparators fused under a versioned policy table.
//! No trained model is involved; treat a match as corroborating evidence only.

pub mod checkpoint;
pub mod fusion;
pub mod geofence;
pub mod metrics;
pub mod normalizer;
pub mod policy;
pub mod presence;
pub mod quality;
pub mod types;
pub mod verifier;

pub use checkpoint::{verify_checkpoint, CheckpointOutcome, CheckpointReport, CheckpointRequest};
pub use geofence::{GeoPoint, GeofenceError, GeofenceReason, GeofenceResult, Location, LocationList};
pub use normalizer::{DecodeError, ImagePayload};
pub use policy::{PolicyError, PolicyTable, PolicyTier};
pub use presence::{PresenceRejection, PresenceReport};
pub use quality::{assess_image, QualityReport};
pub use types::{
    ImageSide, MetricKind, MetricScore, PixelBuffer, PresenceSummary, SamplePresence,
    VerificationResult,
};
pub use verifier::{
    verify_face, FallbackVerifier, FailureKind, HeuristicVerifier, VerificationError, Verifier,
};

/// Check a claimed position and/or postcode against the allow-list.
pub fn check_geofence(
    claimed: Option<GeoPoint>,
    postcode: Option<&str>,
    allowed: &[Location],
) -> GeofenceResult {
    geofence::check_location(claimed, postcode, allowed)
}
