//! facegate-hw — Hardware abstraction for webcam capture.
//!
//! V4L2-based camera access with YUYV→RGB conversion, warm-up handling,
//! and the black-frame quality gate.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::Frame;
