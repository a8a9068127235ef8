//! attend-hw — Hardware layer for the attendance scanner.
//!
//! V4L2 camera capture producing grayscale frames, and the serial link to
//! the motion sensor board (trigger in, acknowledgement out).

pub mod camera;
pub mod frame;
pub mod ports;
pub mod trigger;

pub use camera::{Camera, CameraError, FrameSource};
pub use frame::Frame;
pub use trigger::{SerialTrigger, TriggerError, TriggerSignal, TriggerSource};
