//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Number of mmap buffers queued with the driver.
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("not a video capture device: {0}")]
    NotCaptureDevice(String),
}

/// A V4L2 capture device found on the system.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel format negotiated with the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; the Y channel is kept.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }
}

/// Open camera with a running capture stream.
///
/// The stream holds its own reference to the device handle, so the device
/// stays open exactly as long as the stream does.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Path of the camera at a system index (`0` → `/dev/video0`).
    pub fn path_for_index(index: u32) -> String {
        format!("/dev/video{index}")
    }

    /// Open the camera at a system index; see [`Camera::open_path`].
    pub fn open(index: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        Self::open_path(&Self::path_for_index(index), width, height)
    }

    /// Open a V4L2 device, negotiate a grayscale-convertible format close to
    /// `width`×`height`, and start streaming.
    pub fn open_path(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(libc::EBUSY) {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(device_path.to_string()));
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera opened"
        );

        Ok(Self {
            stream,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Dequeue the next frame as 8-bit grayscale. Blocks until one is ready.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let data = to_grayscale(self.pixel_format, buf, self.width, self.height)?;

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// Drop the first `count` frames while auto exposure settles.
    pub fn warmup(&mut self, count: usize) -> Result<(), CameraError> {
        if count > 0 {
            tracing::info!(count, "discarding warmup frames");
        }
        for _ in 0..count {
            self.capture_frame()?;
        }
        Ok(())
    }

    /// List V4L2 video capture devices among `/dev/video0`–`/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(Self::path_for_index)
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "camera released");
    }
}

fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CameraError> {
    let converted = match format {
        PixelFormat::Grey => {
            let pixels = (width * height) as usize;
            if buf.len() < pixels {
                return Err(CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Y16 => frame::y16_to_grayscale(buf, width, height),
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
    };
    converted.map_err(|e| CameraError::CaptureFailed(format!("{format:?} conversion failed: {e}")))
}
