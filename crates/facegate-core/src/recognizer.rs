//! ArcFace face embedder via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from aligned 112×112
//! RGB face crops (w600k_r50 model).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{Detection, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
// ArcFace uses symmetric normalization, unlike the detector's 128.0.
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; the detector must supply them for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based embedding extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded face recognition model");

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face in an RGB24 frame.
    ///
    /// The detection must carry landmarks; the face is aligned to the
    /// canonical 112×112 crop before inference.
    pub fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &Detection,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(rgb, width, height, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding::new(values))
    }
}

/// Turn a 112×112 RGB24 aligned crop into a 1x3x112x112 NCHW tensor.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));

    for y in 0..ALIGNED_SIZE {
        for x in 0..ALIGNED_SIZE {
            let base = (y * ALIGNED_SIZE + x) * 3;
            for c in 0..3 {
                let pixel = aligned.get(base + c).copied().unwrap_or(0) as f32;
                tensor[[0, c, y, x]] = (pixel - PIXEL_MEAN) / PIXEL_STD;
            }
        }
    }

    tensor
}
