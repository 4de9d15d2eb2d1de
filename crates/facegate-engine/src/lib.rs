//! facegate-engine: ties the observation stream, the capture pipeline and the
//! engine thread together.

pub mod config;
pub mod engine;
pub mod observation;
pub mod pipeline;

pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use observation::{FaceObservationStream, FaceSelection};
pub use pipeline::{CaptureError, CaptureSource, EnrollOutcome, Pipeline, VerifyOutcome};
