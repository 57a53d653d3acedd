use crate::engine::{EngineError, EngineHandle};
use checkpoint_core::{
    check_geofence, CheckpointRequest, GeoPoint, ImagePayload, Location, PolicyTier,
    VerificationError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use zbus::interface;

/// A location claim as sent by callers: any subset of coordinates and postcode.
#[derive(Debug, Default, Deserialize)]
struct LocationClaim {
    latitude: Option<f64>,
    longitude: Option<f64>,
    postcode: Option<String>,
}

impl LocationClaim {
    fn parse(json: &str) -> zbus::fdo::Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid location claim: {e}")))
    }

    fn point(&self) -> Option<GeoPoint> {
        Some(GeoPoint {
            latitude: self.latitude?,
            longitude: self.longitude?,
        })
    }
}

/// D-Bus interface for the Checkpoint verification daemon.
///
/// Bus name: org.checkpoint.Checkpoint1
/// Object path: /org/checkpoint/Checkpoint1
///
/// Images travel as base64 strings (a `data:` URL prefix is accepted). Every
/// method answers with a JSON document carrying `request_id` and
/// `completed_at`, plus either `result` or `error { kind, message }`.
pub struct CheckpointService {
    engine: EngineHandle,
    locations: Arc<Vec<Location>>,
    default_tier: PolicyTier,
    policy_version: u32,
    timeout: Duration,
    started: Instant,
}

impl CheckpointService {
    pub fn new(
        engine: EngineHandle,
        locations: Arc<Vec<Location>>,
        default_tier: PolicyTier,
        policy_version: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            locations,
            default_tier,
            policy_version,
            timeout,
            started: Instant::now(),
        }
    }

    fn tier(&self, tier: &str) -> zbus::fdo::Result<PolicyTier> {
        if tier.trim().is_empty() {
            return Ok(self.default_tier);
        }
        tier.parse()
            .map_err(|e: checkpoint_core::PolicyError| zbus::fdo::Error::InvalidArgs(e.to_string()))
    }

    /// Run `work` on the engine under the per-call timeout and wrap the answer.
    async fn call<T, F>(&self, request_id: Uuid, work: F) -> zbus::fdo::Result<String>
    where
        T: Serialize,
        F: Future<Output = Result<T, EngineError>>,
    {
        let outcome = match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(value)) => {
                let value = serde_json::to_value(value)
                    .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
                Ok(value)
            }
            Ok(Err(err)) => Err(classify(err)?),
            Err(_) => {
                tracing::warn!(
                    %request_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(json!({
                    "kind": "timeout",
                    "message": format!("no answer within {} ms", self.timeout.as_millis()),
                }))
            }
        };
        Ok(envelope(request_id, outcome))
    }
}

/// Caller-facing error object, or a D-Bus error when the daemon itself is broken.
fn classify(err: EngineError) -> zbus::fdo::Result<Value> {
    match err {
        EngineError::Verification(err) => {
            let mut body = json!({ "kind": err.kind().as_str(), "message": err.to_string() });
            if let VerificationError::FaceNotDetected { side, .. }
            | VerificationError::Decode { side, .. } = &err
            {
                body["side"] = json!(side);
            }
            Ok(body)
        }
        EngineError::Decode(err) => Ok(json!({ "kind": "decode", "message": err.to_string() })),
        other => {
            tracing::error!(error = %other, "engine unavailable");
            Err(zbus::fdo::Error::Failed(other.to_string()))
        }
    }
}

fn envelope(request_id: Uuid, outcome: Result<Value, Value>) -> String {
    let mut doc = json!({
        "request_id": request_id.to_string(),
        "completed_at": chrono::Utc::now().to_rfc3339(),
    });
    match outcome {
        Ok(result) => doc["result"] = result,
        Err(error) => doc["error"] = error,
    }
    doc.to_string()
}

#[interface(name = "org.checkpoint.Checkpoint1")]
impl CheckpointService {
    /// Compare a registered face with a captured one.
    async fn verify_face(
        &self,
        registered: &str,
        captured: &str,
        tier: &str,
    ) -> zbus::fdo::Result<String> {
        let tier = self.tier(tier)?;
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, %tier, "verify_face requested");
        let registered = ImagePayload::Base64(registered.to_owned());
        let captured = ImagePayload::Base64(captured.to_owned());
        self.call(request_id, self.engine.verify(registered, captured, tier))
            .await
    }

    /// Check a JSON location claim (`latitude`, `longitude`, `postcode`) against the allow-list.
    async fn check_geofence(&self, claim: &str) -> zbus::fdo::Result<String> {
        let claim = LocationClaim::parse(claim)?;
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, "check_geofence requested");
        let result = check_geofence(claim.point(), claim.postcode.as_deref(), &self.locations);
        let value =
            serde_json::to_value(result).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(envelope(request_id, Ok(value)))
    }

    /// Face verification and geofence in one call.
    async fn verify_checkpoint(
        &self,
        registered: &str,
        captured: &str,
        tier: &str,
        claim: &str,
    ) -> zbus::fdo::Result<String> {
        let tier = self.tier(tier)?;
        let claim = LocationClaim::parse(claim)?;
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, %tier, "verify_checkpoint requested");
        let request = CheckpointRequest {
            registered: ImagePayload::Base64(registered.to_owned()),
            captured: ImagePayload::Base64(captured.to_owned()),
            tier,
            point: claim.point(),
            postcode: claim.postcode,
        };
        self.call(request_id, self.engine.checkpoint(request)).await
    }

    /// Judge whether an image is good enough to register.
    async fn assess_image(&self, image: &str, tier: &str) -> zbus::fdo::Result<String> {
        let tier = self.tier(tier)?;
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, %tier, "assess_image requested");
        self.call(
            request_id,
            self.engine.assess(ImagePayload::Base64(image.to_owned()), tier),
        )
        .await
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "policy_version": self.policy_version,
            "default_tier": self.default_tier,
            "locations": self.locations.len(),
            "verify_timeout_ms": self.timeout.as_millis() as u64,
            "uptime_secs": self.started.elapsed().as_secs(),
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_core::ImageSide;

    #[test]
    fn test_claim_parsing() {
        let claim = LocationClaim::parse(r#"{"latitude": 51.5, "longitude": -0.12}"#).unwrap();
        assert_eq!(claim.point().map(|p| p.latitude), Some(51.5));
        assert!(claim.postcode.is_none());

        let postcode_only = LocationClaim::parse(r#"{"postcode": "SW1A 1AA"}"#).unwrap();
        assert!(postcode_only.point().is_none());

        let half = LocationClaim::parse(r#"{"latitude": 51.5}"#).unwrap();
        assert!(half.point().is_none());

        assert!(LocationClaim::parse("").unwrap().point().is_none());
        assert!(LocationClaim::parse("{not json").is_err());
    }

    #[test]
    fn test_envelope_shape() {
        let id = Uuid::new_v4();
        let doc: Value = serde_json::from_str(&envelope(id, Ok(json!({"allowed": true})))).unwrap();
        assert_eq!(doc["request_id"], id.to_string());
        assert!(doc["completed_at"].is_string());
        assert_eq!(doc["result"]["allowed"], true);
        assert!(doc.get("error").is_none());
    }

    #[test]
    fn test_classify_face_not_detected() {
        let err = EngineError::Verification(VerificationError::FaceNotDetected {
            side: ImageSide::Registered,
            reason: "poor contrast".into(),
            confidence: 0.0,
        });
        let body = classify(err).unwrap();
        assert_eq!(body["kind"], "face_not_detected");
        assert_eq!(body["side"], "registered");
    }

    #[test]
    fn test_classify_closed_engine_is_dbus_error() {
        assert!(classify(EngineError::ChannelClosed).is_err());
    }
}
