//! Frame type, YUYV→RGB conversion, and the black-frame gate.

/// A captured RGB24 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Mean byte intensity across all channels (0.0–255.0).
    pub fn mean_intensity(&self) -> f32 {
        mean_intensity(&self.data)
    }

    /// True if the frame is too dark to be useful, i.e. the sensor has not
    /// stabilized yet.
    pub fn is_black(&self, threshold: f32) -> bool {
        is_black(&self.data, threshold)
    }
}

/// Mean byte value of a pixel buffer; empty buffers count as 0.
pub fn mean_intensity(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|&b| b as u64).sum::<u64>() as f32 / data.len() as f32
}

/// Frame-quality gate: true when mean intensity falls below `threshold`.
/// An empty buffer is black.
pub fn is_black(data: &[u8], threshold: f32) -> bool {
    mean_intensity(data) < threshold
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert a packed YUYV (4:2:2) buffer to interleaved RGB24 using BT.601
/// full-range coefficients. Two pixels are packed per 4 bytes: [Y0 U Y1 V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let [y0, u, y1, v] = [quad[0], quad[1], quad[2], quad[3]];
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = cb as i32 - 128;
    let e = cr as i32 - 128;

    let clamp = |v: i32| -> u8 { ((v + 128) >> 8).clamp(0, 255) as u8 };
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}
