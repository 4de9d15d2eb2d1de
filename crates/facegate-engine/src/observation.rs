//! Continuous face tracking on the analysis stream.
//!
//! Frames are handed to [`FaceObservationStream::submit`] as they arrive. At
//! most one detection runs at a time; a frame that arrives while the detector
//! is busy is dropped on the spot, which returns its pool slot. The result of
//! each detection replaces the single published observation.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use facegate_core::{CameraFacing, Detection, FaceDetector, FaceObservation, Rotation};
use facegate_hw::Frame;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Which face to track when the detector reports several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    /// The detector's first result.
    #[default]
    #[serde(alias = "first")]
    FirstReported,
    /// Largest box area; the earliest reported wins ties.
    Largest,
    /// Box center nearest the frame center.
    #[serde(alias = "center")]
    ClosestToCenter,
}

impl FaceSelection {
    pub fn select<'a>(
        self,
        detections: &'a [Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> Option<&'a Detection> {
        match self {
            Self::FirstReported => detections.first(),
            Self::Largest => detections.iter().reduce(|best, d| {
                if d.bbox.area() > best.bbox.area() {
                    d
                } else {
                    best
                }
            }),
            Self::ClosestToCenter => {
                let (cx, cy) = (frame_width as f32 / 2.0, frame_height as f32 / 2.0);
                let distance = |d: &Detection| {
                    let (x, y) = d.bbox.center();
                    (x - cx).powi(2) + (y - cy).powi(2)
                };
                detections.iter().reduce(|best, d| {
                    if distance(d) < distance(best) {
                        d
                    } else {
                        best
                    }
                })
            }
        }
    }
}

impl FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" | "first_reported" => Ok(Self::FirstReported),
            "largest" => Ok(Self::Largest),
            "center" | "closest_to_center" => Ok(Self::ClosestToCenter),
            other => Err(format!("unknown face selection: {other}")),
        }
    }
}

/// Clears the in-flight flag when dropped, panics included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared<D> {
    detector: Mutex<D>,
    selection: FaceSelection,
    latest: watch::Sender<Option<FaceObservation>>,
}

impl<D: FaceDetector> Shared<D> {
    fn detect_and_publish(&self, frame: Frame, _guard: InFlightGuard) {
        let rotation = match Rotation::from_degrees(frame.rotation_degrees) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "analysis frame rejected");
                self.latest.send_replace(None);
                return;
            }
        };

        let (width, height) = (frame.width(), frame.height());
        let detections = {
            let mut detector = self.detector.lock().unwrap_or_else(|p| p.into_inner());
            detector.detect(&frame.image)
        };

        let observation = match detections {
            Ok(faces) => self
                .selection
                .select(&faces, width, height)
                .map(|d| FaceObservation {
                    bbox: d.bbox,
                    rotation,
                    frame_width: width,
                    frame_height: height,
                    observed_at: frame.timestamp,
                }),
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "face detection failed");
                None
            }
        };

        tracing::debug!(
            sequence = frame.sequence,
            found = observation.is_some(),
            "analysis frame processed"
        );
        self.latest.send_replace(observation);
    }
}

pub struct FaceObservationStream<D> {
    shared: Arc<Shared<D>>,
    in_flight: Arc<AtomicBool>,
    facing: CameraFacing,
}

impl<D: FaceDetector + Send + 'static> FaceObservationStream<D> {
    pub fn new(detector: D, selection: FaceSelection, facing: CameraFacing) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                detector: Mutex::new(detector),
                selection,
                latest,
            }),
            in_flight: Arc::new(AtomicBool::new(false)),
            facing,
        }
    }

    /// Start detection on a blocking worker.
    ///
    /// Returns `None` (and drops the frame) when a detection is already in
    /// flight. Must be called from within a tokio runtime.
    pub fn submit(&self, frame: Frame) -> Option<JoinHandle<()>> {
        let Some(guard) = self.try_begin() else {
            tracing::trace!(sequence = frame.sequence, "detector busy, frame dropped");
            return None;
        };
        let shared = Arc::clone(&self.shared);
        Some(tokio::task::spawn_blocking(move || {
            shared.detect_and_publish(frame, guard)
        }))
    }

    /// Run detection on the calling thread. Returns `false` if the frame was
    /// dropped because another detection is in flight.
    pub fn process(&self, frame: Frame) -> bool {
        let Some(guard) = self.try_begin() else {
            tracing::trace!(sequence = frame.sequence, "detector busy, frame dropped");
            return false;
        };
        self.shared.detect_and_publish(frame, guard);
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<FaceObservation>> {
        self.shared.latest.subscribe()
    }

    pub fn latest(&self) -> Option<FaceObservation> {
        self.shared.latest.borrow().clone()
    }

    /// Facing of the analysis camera, for mirroring an overlay.
    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    pub fn is_detecting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(&self.in_flight)))
    }
}
