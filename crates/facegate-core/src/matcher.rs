//! Live-frame matcher: detect faces on a downscaled frame and label each
//! with its nearest gallery owner within tolerance.

use crate::gallery::Gallery;
use crate::oracle::{FaceOracle, OracleError};
use crate::types::RecognizedFace;
use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

/// Maximum embedding distance for a face to count as a gallery match.
pub const DEFAULT_TOLERANCE: f32 = 0.45;
/// Frame downscale factor applied before detection and embedding.
pub const DEFAULT_DOWNSCALE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB24")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Matching parameters. Defaults follow the classic webcam-login recipe:
/// quarter-resolution detection with a 0.45 distance tolerance.
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub tolerance: f32,
    pub downscale: f32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            downscale: DEFAULT_DOWNSCALE,
        }
    }
}

/// Find and label every face in an RGB24 frame.
///
/// The frame is downscaled by `settings.downscale` before detection and
/// embedding; returned boxes are divided by the same factor so they are in
/// original-frame coordinates. Each face is labelled with the owner of the
/// nearest gallery entry iff that distance is within `settings.tolerance`;
/// with an empty gallery every face is unmatched. Stateless: one call, one
/// frame.
pub fn recognize(
    oracle: &mut dyn FaceOracle,
    rgb: &[u8],
    width: u32,
    height: u32,
    gallery: &Gallery,
    settings: &MatchSettings,
) -> Result<Vec<RecognizedFace>, MatchError> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() != expected {
        return Err(MatchError::InvalidFrame {
            width,
            height,
            expected,
            actual: rgb.len(),
        });
    }

    let downscale = settings.downscale.clamp(f32::MIN_POSITIVE, 1.0);
    let (small, small_w, small_h) = downscale_frame(rgb, width, height, downscale);

    let faces = oracle.detect(&small, small_w, small_h)?;
    let embeddings = oracle.embed(&small, small_w, small_h, &faces)?;

    let mut results = Vec::with_capacity(faces.len());
    for (face, embedding) in faces.iter().zip(embeddings.iter()) {
        let nearest = gallery.nearest(embedding);
        let name = match nearest {
            Some((entry, dist)) if dist <= settings.tolerance => Some(entry.owner.clone()),
            _ => None,
        };
        results.push(RecognizedFace {
            location: face.location.unscale(downscale),
            name,
            distance: nearest.map(|(_, dist)| dist),
        });
    }

    tracing::debug!(
        faces = results.len(),
        matched = results.iter().filter(|r| r.name.is_some()).count(),
        "frame matched against gallery"
    );

    Ok(results)
}

/// Bilinear downscale of an RGB24 buffer. A factor of 1.0 is a passthrough
/// copy.
fn downscale_frame(rgb: &[u8], width: u32, height: u32, factor: f32) -> (Vec<u8>, u32, u32) {
    if factor >= 1.0 {
        return (rgb.to_vec(), width, height);
    }
    let small_w = ((width as f32 * factor).round() as u32).max(1);
    let small_h = ((height as f32 * factor).round() as u32).max(1);

    // Length was validated by the caller; from_raw cannot fail here.
    let img = RgbImage::from_raw(width, height, rgb.to_vec())
        .unwrap_or_else(|| RgbImage::new(width, height));
    let small = image::imageops::resize(&img, small_w, small_h, FilterType::Triangle);
    (small.into_raw(), small_w, small_h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;
    use crate::types::{Detection, Embedding, FaceBox, UNKNOWN_LABEL};

    /// Scripted oracle that returns a fixed set of detections and
    /// embeddings, recording the frame size it was called with.
    struct ScriptedOracle {
        faces: Vec<(Detection, Embedding)>,
        seen: Vec<(u32, u32)>,
    }

    impl ScriptedOracle {
        fn one(location: FaceBox, embedding: Vec<f32>) -> Self {
            Self {
                faces: vec![(
                    Detection { location, confidence: 0.9, landmarks: None },
                    Embedding::new(embedding),
                )],
                seen: Vec::new(),
            }
        }
    }

    impl FaceOracle for ScriptedOracle {
        fn detect(
            &mut self,
            _rgb: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Vec<Detection>, OracleError> {
            self.seen.push((width, height));
            Ok(self.faces.iter().map(|(d, _)| d.clone()).collect())
        }

        fn embed(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
            faces: &[Detection],
        ) -> Result<Vec<Embedding>, OracleError> {
            Ok(self
                .faces
                .iter()
                .take(faces.len())
                .map(|(_, e)| e.clone())
                .collect())
        }
    }

    fn frame(width: u32, height: u32) -> Vec<u8> {
        vec![128u8; (width * height * 3) as usize]
    }

    fn small_box() -> FaceBox {
        FaceBox { top: 10.0, right: 50.0, bottom: 40.0, left: 5.0 }
    }

    fn gallery_of(entries: &[(&str, Vec<f32>)]) -> Gallery {
        Gallery::from_entries(
            entries
                .iter()
                .map(|(owner, values)| GalleryEntry {
                    owner: owner.to_string(),
                    embedding: Embedding::new(values.clone()),
                })
                .collect(),
        )
    }

    #[test]
    fn test_exact_match_is_labelled() {
        let mut oracle = ScriptedOracle::one(small_box(), vec![1.0, 0.0, 0.0]);
        let gallery = gallery_of(&[("alice", vec![0.0, 1.0, 0.0]), ("bob", vec![1.0, 0.0, 0.0])]);

        let faces = recognize(&mut oracle, &frame(160, 120), 160, 120, &gallery, &MatchSettings::default())
            .unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].name.as_deref(), Some("bob"));
        assert_eq!(faces[0].distance, Some(0.0));
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let mut oracle = ScriptedOracle::one(small_box(), vec![1.0, 0.0, 0.0]);
        let gallery = Gallery::default();
        let settings = MatchSettings { tolerance: 1000.0, ..Default::default() };

        let faces = recognize(&mut oracle, &frame(160, 120), 160, 120, &gallery, &settings).unwrap();
        assert_eq!(faces.len(), 1);
        assert!(faces[0].name.is_none());
        assert!(faces[0].distance.is_none());
        assert_eq!(faces[0].label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_beyond_tolerance_is_unknown() {
        // Nearest entry exists but is farther than the tolerance.
        let mut oracle = ScriptedOracle::one(small_box(), vec![1.0, 0.0, 0.0]);
        let gallery = gallery_of(&[("alice", vec![0.0, 1.0, 0.0])]);

        let faces = recognize(&mut oracle, &frame(160, 120), 160, 120, &gallery, &MatchSettings::default())
            .unwrap();
        assert!(faces[0].name.is_none());
        // Distance is still reported for diagnostics.
        assert!(faces[0].distance.unwrap() > DEFAULT_TOLERANCE);
    }

    #[test]
    fn test_boxes_rescaled_to_frame_coordinates() {
        let mut oracle = ScriptedOracle::one(small_box(), vec![1.0, 0.0, 0.0]);
        let gallery = Gallery::default();

        let faces = recognize(&mut oracle, &frame(160, 120), 160, 120, &gallery, &MatchSettings::default())
            .unwrap();
        assert_eq!(
            faces[0].location,
            FaceBox { top: 40.0, right: 200.0, bottom: 160.0, left: 20.0 }
        );
    }

    #[test]
    fn test_detection_runs_on_downscaled_frame() {
        let mut oracle = ScriptedOracle::one(small_box(), vec![1.0]);
        let gallery = Gallery::default();

        recognize(&mut oracle, &frame(160, 120), 160, 120, &gallery, &MatchSettings::default())
            .unwrap();
        assert_eq!(oracle.seen, vec![(40, 30)]);
    }

    #[test]
    fn test_invalid_frame_length() {
        let mut oracle = ScriptedOracle::one(small_box(), vec![1.0]);
        let gallery = Gallery::default();

        let err = recognize(&mut oracle, &[0u8; 10], 160, 120, &gallery, &MatchSettings::default())
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidFrame { .. }));
    }

    #[test]
    fn test_no_faces_yields_empty_result() {
        let mut oracle = ScriptedOracle { faces: vec![], seen: vec![] };
        let gallery = gallery_of(&[("alice", vec![1.0])]);

        let faces = recognize(&mut oracle, &frame(64, 48), 64, 48, &gallery, &MatchSettings::default())
            .unwrap();
        assert!(faces.is_empty());
    }
}
