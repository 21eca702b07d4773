//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device does not support video capture")]
    StreamingNotSupported,
    #[error("camera produced only black frames during warm-up ({attempts} attempts)")]
    WarmupTimedOut { attempts: usize },
}

/// Info about a discovered V4L2 capture device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Exclusively-owned webcam handle. The device node is released when the
/// handle drops, on every exit path.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
}

impl Camera {
    /// Device node path for a camera index (`0` → `/dev/video0`).
    pub fn path_for_index(index: u32) -> String {
        format!("/dev/video{index}")
    }

    /// Open a webcam by device path, negotiating 640×480 YUYV.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        if negotiated.fourcc != FourCC::new(b"YUYV") {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "device negotiated {:?}, need YUYV",
                negotiated.fourcc
            )));
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            "negotiated YUYV format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
        })
    }

    /// Capture a single RGB24 frame. Blocks until the driver hands one over.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}")))?;

        Ok(Frame {
            data: rgb,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        })
    }

    /// Warm the sensor up: capture and discard frames until one passes the
    /// black-frame gate, sleeping `settle` between attempts.
    ///
    /// Webcams commonly deliver near-black frames while auto-exposure
    /// stabilizes. Returns the first usable frame, or
    /// [`CameraError::WarmupTimedOut`] after `max_attempts` black frames.
    pub fn warm_up(
        &self,
        max_attempts: usize,
        settle: Duration,
        black_threshold: f32,
    ) -> Result<Frame, CameraError> {
        for attempt in 1..=max_attempts {
            let frame = self.capture_frame()?;
            if !frame.is_black(black_threshold) {
                tracing::debug!(attempt, brightness = frame.mean_intensity(), "camera warmed up");
                return Ok(frame);
            }
            tracing::debug!(attempt, max_attempts, "discarding black warm-up frame");
            std::thread::sleep(settle);
        }
        Err(CameraError::WarmupTimedOut { attempts: max_attempts })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = Self::path_for_index(i);
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
            });
        }

        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_index() {
        assert_eq!(Camera::path_for_index(0), "/dev/video0");
        assert_eq!(Camera::path_for_index(12), "/dev/video12");
    }
}
