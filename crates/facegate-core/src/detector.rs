//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free 3-stride decoding with NMS post-processing, operating on
//! RGB24 frames letterboxed to the 640×640 model input.

use crate::types::{Detection, FaceBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied by the letterbox resize, kept to map detector
/// output back into frame coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector over RGB24 frames.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32], discovered by
    /// name at load time with a positional fallback.
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_outputs = map_output_tensors(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_outputs,
            "loaded face detection model"
        );

        Ok(Self { session, stride_outputs })
    }

    /// Detect faces in an RGB24 frame, returning detections sorted by
    /// descending confidence, in frame coordinates.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(rgb, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[slot];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            decode_stride(scores, bboxes, kps, stride, &letterbox, &mut candidates);
        }

        let mut detections = nms(candidates, NMS_THRESHOLD);
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(detections)
    }
}

/// Letterbox an RGB24 frame into a 1x3x640x640 NCHW tensor.
///
/// Bilinear resize preserving aspect ratio, centered with padding that
/// normalizes to zero.
fn preprocess(rgb: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).max(1);
    let new_h = ((height as f32 * scale).round() as usize).max(1);
    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;

    let x_off = pad_x.floor() as usize;
    let y_off = pad_y.floor() as usize;
    let inv_scale = 1.0 / scale;

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let inside =
                y >= y_off && y < y_off + new_h && x >= x_off && x < x_off + new_w;
            let pixel = if inside {
                sample_bilinear(rgb, width, height, (x - x_off) as f32 * inv_scale + (inv_scale - 1.0) / 2.0,
                    (y - y_off) as f32 * inv_scale + (inv_scale - 1.0) / 2.0)
            } else {
                [PIXEL_MEAN; 3]
            };
            for c in 0..3 {
                tensor[[0, c, y, x]] = (pixel[c] - PIXEL_MEAN) / PIXEL_STD;
            }
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Bilinear sample of an RGB24 buffer at fractional coordinates.
fn sample_bilinear(rgb: &[u8], width: usize, height: usize, sx: f32, sy: f32) -> [f32; 3] {
    let x0 = (sx.floor() as i64).clamp(0, width as i64 - 1) as usize;
    let y0 = (sy.floor() as i64).clamp(0, height as i64 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (sx - sx.floor()).clamp(0.0, 1.0);
    let fy = (sy - sy.floor()).clamp(0.0, 1.0);

    let px = |x: usize, y: usize, c: usize| rgb[(y * width + x) * 3 + c] as f32;

    let mut out = [0.0f32; 3];
    for (c, v) in out.iter_mut().enumerate() {
        let top = px(x0, y0, c) * (1.0 - fx) + px(x1, y0, c) * fx;
        let bot = px(x0, y1, c) * (1.0 - fx) + px(x1, y1, c) * fx;
        *v = top * (1.0 - fy) + bot * fy;
    }
    out
}

/// Discover output tensor ordering by name ("score_8", "bbox_16", "kps_32", ...).
/// Models exported with generic numeric names fall back to the standard
/// positional layout: [0-2]=scores, [3-5]=bboxes, [6-8]=kps.
fn map_output_tensors(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let all_named = STRIDES.iter().all(|&s| {
        find("score", s).is_some() && find("bbox", s).is_some() && find("kps", s).is_some()
    });

    if all_named {
        std::array::from_fn(|i| {
            let s = STRIDES[i];
            (
                find("score", s).unwrap(),
                find("bbox", s).unwrap(),
                find("kps", s).unwrap(),
            )
        })
    } else {
        tracing::debug!(?names, "output names not recognized, using positional mapping");
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode anchor-free detections for one stride level into frame coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<Detection>,
) {
    let grid = INPUT_SIZE / stride;
    let num_anchors = grid * grid * ANCHORS_PER_CELL;

    let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
    let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        // Offsets are [left, top, right, bottom] distances from the anchor
        // center, in stride units.
        let left = unmap_x(anchor_cx - bboxes[off] * stride as f32);
        let top = unmap_y(anchor_cy - bboxes[off + 1] * stride as f32);
        let right = unmap_x(anchor_cx + bboxes[off + 2] * stride as f32);
        let bottom = unmap_y(anchor_cy + bboxes[off + 3] * stride as f32);

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                *lm = (
                    unmap_x(anchor_cx + kps[kps_off + i * 2] * stride as f32),
                    unmap_y(anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32),
                );
            }
            Some(lms)
        } else {
            None
        };

        out.push(Detection {
            location: FaceBox { top, right, bottom, left },
            confidence: score,
            landmarks,
        });
    }
}

/// Non-maximum suppression over overlapping detections.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.location, &det.location) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-union of two face boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let left = a.left.max(b.left);
    let top = a.top.max(b.top);
    let right = a.right.min(b.right);
    let bottom = a.bottom.min(b.bottom);

    let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(top: f32, right: f32, bottom: f32, left: f32, conf: f32) -> Detection {
        Detection {
            location: FaceBox { top, right, bottom, left },
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = FaceBox { top: 0.0, right: 100.0, bottom: 100.0, left: 0.0 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = FaceBox { top: 0.0, right: 10.0, bottom: 10.0, left: 0.0 };
        let b = FaceBox { top: 20.0, right: 30.0, bottom: 30.0, left: 20.0 };
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = FaceBox { top: 0.0, right: 10.0, bottom: 10.0, left: 0.0 };
        let b = FaceBox { top: 0.0, right: 15.0, bottom: 10.0, left: 5.0 };
        // intersection 5x10 = 50, union 100 + 100 - 50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let candidates = vec![
            det(0.0, 100.0, 100.0, 0.0, 0.9),
            det(5.0, 105.0, 105.0, 5.0, 0.8),
            det(200.0, 250.0, 250.0, 200.0, 0.7),
        ];
        let kept = nms(candidates, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let candidates = vec![
            det(0.0, 10.0, 10.0, 0.0, 0.9),
            det(50.0, 60.0, 60.0, 50.0, 0.8),
        ];
        assert_eq!(nms(candidates, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_map_output_tensors_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8", "bbox_16", "bbox_32",
            "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mapping = map_output_tensors(&names);
        assert_eq!(mapping, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_map_output_tensors_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mapping = map_output_tensors(&names);
        assert_eq!(mapping, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_map_output_tensors_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(map_output_tensors(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_preprocess_uniform_frame() {
        // A uniform mid-gray frame normalizes close to zero everywhere,
        // including the padding.
        let w = 64usize;
        let h = 48usize;
        let rgb = vec![128u8; w * h * 3];
        let (tensor, letterbox) = preprocess(&rgb, w, h);

        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        assert!(letterbox.scale > 0.0);
        let max = tensor.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(max < 0.01, "uniform frame should normalize near zero, max={max}");
    }

    #[test]
    fn test_letterbox_roundtrip() {
        // A frame coordinate mapped into letterbox space and back recovers
        // its original value.
        let (w, h) = (320.0f32, 240.0f32);
        let scale = (INPUT_SIZE as f32 / w).min(INPUT_SIZE as f32 / h);
        let pad_x = (INPUT_SIZE as f32 - (w * scale).round()) / 2.0;
        let pad_y = (INPUT_SIZE as f32 - (h * scale).round()) / 2.0;

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let mapped = (orig_x * scale + pad_x, orig_y * scale + pad_y);
        let back = ((mapped.0 - pad_x) / scale, (mapped.1 - pad_y) / scale);

        assert!((back.0 - orig_x).abs() < 0.1);
        assert!((back.1 - orig_y).abs() < 0.1);
    }
}
