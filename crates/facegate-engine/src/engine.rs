use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use facegate_core::{Embedding, EmbeddingModel, FaceObservation, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::pipeline::{EnrollOutcome, Pipeline, VerifyOutcome};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Enroll {
        observation: FaceObservation,
        slot: String,
        busy: BusyGuard,
        reply: oneshot::Sender<EnrollOutcome>,
    },
    Verify {
        observation: FaceObservation,
        slot: String,
        busy: BusyGuard,
        reply: oneshot::Sender<VerifyOutcome>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<String>, StoreError>>,
    },
    Load {
        slot: String,
        reply: oneshot::Sender<Result<Option<Embedding>, StoreError>>,
    },
    Remove {
        slot: String,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
}

/// Clears the busy flag when dropped. Travels with the request so the flag
/// stays set until the engine thread has finished the attempt, even if the
/// caller stops waiting.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    busy: Arc<AtomicBool>,
    observations: watch::Receiver<Option<FaceObservation>>,
    max_age: Duration,
}

impl EngineHandle {
    /// Enroll the currently observed face into `slot`.
    ///
    /// Returns `Busy` without doing anything if another enroll or verify is
    /// running, and `FaceNotDetected` without capturing if there is no fresh
    /// observation.
    pub async fn enroll(&self, slot: &str) -> Result<EnrollOutcome, EngineError> {
        let Some(busy) = self.try_busy() else {
            tracing::info!(slot, "enroll: attempt already running");
            return Ok(EnrollOutcome::Busy);
        };
        let Some(observation) = self.fresh_observation() else {
            tracing::info!(slot, "enroll: no fresh face observation");
            return Ok(EnrollOutcome::FaceNotDetected);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Enroll {
            observation,
            slot: slot.to_string(),
            busy,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Compare the currently observed face against the record in `slot`.
    pub async fn verify(&self, slot: &str) -> Result<VerifyOutcome, EngineError> {
        let Some(busy) = self.try_busy() else {
            tracing::info!(slot, "verify: attempt already running");
            return Ok(VerifyOutcome::Busy);
        };
        let Some(observation) = self.fresh_observation() else {
            tracing::info!(slot, "verify: no fresh face observation");
            return Ok(VerifyOutcome::FaceNotDetected);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Verify {
            observation,
            slot: slot.to_string(),
            busy,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn list(&self) -> Result<Vec<String>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::List { reply: reply_tx }).await?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    pub async fn load(&self, slot: &str) -> Result<Option<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Load {
            slot: slot.to_string(),
            reply: reply_tx,
        })
        .await?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Delete the record in `slot`. Returns whether one existed.
    pub async fn remove(&self, slot: &str) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Remove {
            slot: slot.to_string(),
            reply: reply_tx,
        })
        .await?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }

    fn try_busy(&self) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.busy)))
    }

    fn fresh_observation(&self) -> Option<FaceObservation> {
        let latest = self.observations.borrow().clone();
        latest.filter(|o| o.is_fresh(self.max_age))
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The pipeline (capture source, embedding model, store) is moved onto the
/// thread; capture, inference and file I/O all run there. Observations are
/// read from `observations` at the moment a caller triggers an attempt.
pub fn spawn_engine<M>(
    mut pipeline: Pipeline<M>,
    observations: watch::Receiver<Option<FaceObservation>>,
    max_age: Duration,
) -> EngineHandle
where
    M: EmbeddingModel + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!(dimension = pipeline.store().dimension(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        observation,
                        slot,
                        busy,
                        reply,
                    } => {
                        let outcome = pipeline.enroll(Some(&observation), &slot);
                        drop(busy);
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::Verify {
                        observation,
                        slot,
                        busy,
                        reply,
                    } => {
                        let outcome = pipeline.verify(Some(&observation), &slot);
                        drop(busy);
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::List { reply } => {
                        let _ = reply.send(pipeline.store().list());
                    }
                    EngineRequest::Load { slot, reply } => {
                        let _ = reply.send(pipeline.store().load(&slot));
                    }
                    EngineRequest::Remove { slot, reply } => {
                        let _ = reply.send(pipeline.store().remove(&slot));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        busy: Arc::new(AtomicBool::new(false)),
        observations,
        max_age,
    }
}
