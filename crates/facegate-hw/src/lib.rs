//! facegate-hw: the camera-side boundary.
//!
//! Camera binding itself lives in the host application. This crate defines
//! what crosses the boundary: RGB frames leased from a bounded buffer pool,
//! and conversion from the raw pixel formats cameras hand out.

pub mod frame;
pub mod pool;

pub use frame::{nv21_to_rgb, yuyv_to_rgb, Frame, FrameError};
pub use pool::FramePool;
