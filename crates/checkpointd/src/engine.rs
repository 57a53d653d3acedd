use checkpoint_core::{
    assess_image, verify_checkpoint, CheckpointReport, CheckpointRequest, DecodeError,
    HeuristicVerifier, ImagePayload, Location, PolicyTier, QualityReport, VerificationError,
    VerificationResult,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("image could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Verify {
        registered: ImagePayload,
        captured: ImagePayload,
        tier: PolicyTier,
        reply: oneshot::Sender<Result<VerificationResult, EngineError>>,
    },
    Checkpoint {
        request: Box<CheckpointRequest>,
        reply: oneshot::Sender<CheckpointReport>,
    },
    Assess {
        image: ImagePayload,
        tier: PolicyTier,
        reply: oneshot::Sender<Result<QualityReport, EngineError>>,
    },
}

impl EngineRequest {
    fn label(&self) -> &'static str {
        match self {
            EngineRequest::Verify { .. } => "verify",
            EngineRequest::Checkpoint { .. } => "checkpoint",
            EngineRequest::Assess { .. } => "assess",
        }
    }

    /// The caller stopped waiting (outer timeout or dropped call).
    fn is_abandoned(&self) -> bool {
        match self {
            EngineRequest::Verify { reply, .. } => reply.is_closed(),
            EngineRequest::Checkpoint { reply, .. } => reply.is_closed(),
            EngineRequest::Assess { reply, .. } => reply.is_closed(),
        }
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn verify(
        &self,
        registered: ImagePayload,
        captured: ImagePayload,
        tier: PolicyTier,
    ) -> Result<VerificationResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Verify {
            registered,
            captured,
            tier,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Face verification and geofence against the daemon's allow-list.
    pub async fn checkpoint(
        &self,
        request: CheckpointRequest,
    ) -> Result<CheckpointReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Checkpoint {
            request: Box::new(request),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn assess(
        &self,
        image: ImagePayload,
        tier: PolicyTier,
    ) -> Result<QualityReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Assess { image, tier, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Requests are served one at a time; the metric fan-out inside a single
/// verification runs on the rayon pool.
pub fn spawn_engine(
    verifier: HeuristicVerifier,
    locations: Arc<Vec<Location>>,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("checkpoint-engine".into())
        .spawn(move || {
            tracing::info!(locations = locations.len(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                serve(&verifier, &locations, req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Run one request on the engine thread. Returns `false` if it was skipped.
fn serve(verifier: &HeuristicVerifier, locations: &[Location], req: EngineRequest) -> bool {
    if req.is_abandoned() {
        tracing::debug!(request = req.label(), "caller gone; skipping queued request");
        return false;
    }
    match req {
        EngineRequest::Verify {
            registered,
            captured,
            tier,
            reply,
        } => {
            let result = verifier
                .verify_face(&registered, &captured, tier)
                .map_err(EngineError::from);
            let _ = reply.send(result);
        }
        EngineRequest::Checkpoint { request, reply } => {
            let report = verify_checkpoint(verifier, &request, locations);
            let _ = reply.send(report);
        }
        EngineRequest::Assess { image, tier, reply } => {
            let result = assess_image(&image, tier, verifier.policy()).map_err(EngineError::from);
            let _ = reply.send(result);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn garbage() -> ImagePayload {
        ImagePayload::Encoded(b"not an image".to_vec())
    }

    #[test]
    fn test_abandoned_request_is_skipped() {
        let (reply, rx) = oneshot::channel();
        drop(rx);
        let req = EngineRequest::Verify {
            registered: garbage(),
            captured: garbage(),
            tier: PolicyTier::Standard,
            reply,
        };
        assert!(req.is_abandoned());
        assert!(!serve(&HeuristicVerifier::default(), &[], req));
    }

    #[test]
    fn test_live_request_is_answered() {
        let (reply, mut rx) = oneshot::channel();
        let req = EngineRequest::Assess {
            image: garbage(),
            tier: PolicyTier::Strict,
            reply,
        };
        assert!(serve(&HeuristicVerifier::default(), &[], req));
        assert!(matches!(rx.try_recv(), Ok(Err(EngineError::Decode(_)))));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let engine = spawn_engine(HeuristicVerifier::default(), Arc::new(Vec::new())).unwrap();
        let err = engine
            .verify(garbage(), garbage(), PolicyTier::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Verification(_)));
    }
}
