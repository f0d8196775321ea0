//! emotrig-hw: device access for the emotion trigger.
//!
//! V4L2 camera capture to grayscale frames, a raw 8N1 serial TTY for the
//! microcontroller link, and non-blocking key polling on the controlling
//! terminal.

pub mod camera;
pub mod frame;
pub mod serial;
pub mod terminal;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use serial::{SerialError, SerialPort};
pub use terminal::RawTerminal;
