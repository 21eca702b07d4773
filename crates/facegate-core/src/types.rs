use serde::{Deserialize, Serialize};

/// Label used for faces that match no gallery entry.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Axis-aligned face bounding box in pixel coordinates: (top, right, bottom, left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Map a box found on a frame downscaled by `factor` back to
    /// original-frame coordinates (every coordinate divided by `factor`).
    pub fn unscale(&self, factor: f32) -> FaceBox {
        FaceBox {
            top: self.top / factor,
            right: self.right / factor,
            bottom: self.bottom / factor,
            left: self.left / factor,
        }
    }
}

/// A face found by the detector, in the coordinates of the frame it was
/// detected on.
#[derive(Debug, Clone)]
pub struct Detection {
    pub location: FaceBox,
    pub confidence: f32,
    /// Five-point landmarks [left_eye, right_eye, nose, left_mouth, right_mouth],
    /// required for alignment before embedding extraction.
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional, L2-normalized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another embedding. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One matcher output: a face location in original-frame coordinates and the
/// gallery owner it matched, if any.
#[derive(Debug, Clone, Serialize)]
pub struct RecognizedFace {
    pub location: FaceBox,
    /// `Some(owner)` when the nearest gallery entry is within tolerance,
    /// `None` otherwise (rendered as "Unknown").
    pub name: Option<String>,
    /// Distance to the nearest gallery entry; `None` for an empty gallery.
    pub distance: Option<f32>,
}

impl RecognizedFace {
    /// Display label: the matched owner or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![0.3, 0.4, 0.0]);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        let b = Embedding::new(vec![-1.0, 0.5, 2.0]);
        assert!((a.distance(&b) - b.distance(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_unscale_quarter() {
        // Box found on a frame downscaled by 0.25 maps back by division.
        let small = FaceBox { top: 10.0, right: 50.0, bottom: 40.0, left: 5.0 };
        let full = small.unscale(0.25);
        assert_eq!(full, FaceBox { top: 40.0, right: 200.0, bottom: 160.0, left: 20.0 });
    }

    #[test]
    fn test_unscale_identity() {
        let b = FaceBox { top: 1.0, right: 2.0, bottom: 3.0, left: 0.5 };
        assert_eq!(b.unscale(1.0), b);
    }

    #[test]
    fn test_box_dimensions() {
        let b = FaceBox { top: 10.0, right: 110.0, bottom: 60.0, left: 30.0 };
        assert_eq!(b.width(), 80.0);
        assert_eq!(b.height(), 50.0);
        assert_eq!(b.area(), 4000.0);
    }

    #[test]
    fn test_label_fallback() {
        let face = RecognizedFace {
            location: FaceBox { top: 0.0, right: 1.0, bottom: 1.0, left: 0.0 },
            name: None,
            distance: Some(0.9),
        };
        assert_eq!(face.label(), UNKNOWN_LABEL);
    }
}
