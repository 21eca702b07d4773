//! The face oracle seam: detection and embedding extraction behind a trait.
//!
//! The gallery builder and matcher depend only on this contract; the shipped
//! implementation wires the SCRFD detector and ArcFace recognizer together.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Detection, Embedding};
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name (InsightFace buffalo_l export).
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum OracleError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// Face detection and embedding extraction over RGB24 frames.
pub trait FaceOracle {
    /// All faces in the frame, sorted by descending confidence.
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, OracleError>;

    /// One embedding per given face, index-aligned with `faces`.
    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        faces: &[Detection],
    ) -> Result<Vec<Embedding>, OracleError>;
}

/// ONNX-backed oracle: SCRFD + ArcFace sessions.
pub struct OnnxOracle {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxOracle {
    /// Load both models from a directory containing
    /// [`DETECTOR_MODEL_FILE`] and [`RECOGNIZER_MODEL_FILE`].
    pub fn load(model_dir: &Path) -> Result<Self, OracleError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceOracle for OnnxOracle {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, OracleError> {
        Ok(self.detector.detect(rgb, width, height)?)
    }

    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        faces: &[Detection],
    ) -> Result<Vec<Embedding>, OracleError> {
        faces
            .iter()
            .map(|face| Ok(self.recognizer.extract(rgb, width, height, face)?))
            .collect()
    }
}
