//! Frame capture module
//!
//! The pipeline only needs a [`FrameSource`] that hands back one compressed
//! still per call. [`Capturer`] wraps any source with the payload size gate and
//! the startup readiness retries; [`StillImageSource`] is the file-backed device
//! used by the binary.

pub mod capturer;
pub mod still;
mod traits;

pub use capturer::{CaptureError, Capturer, DeviceInitError};
pub use still::StillImageSource;
pub use traits::FrameSource;
