//! facegate-core — Face-login engine.
//!
//! Builds an in-memory gallery of face embeddings from a registration photo
//! tree and matches live frames against it. Detection and embedding
//! extraction sit behind the [`FaceOracle`] trait; the shipped
//! implementation runs SCRFD + ArcFace via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod oracle;
pub mod recognizer;
pub mod store;
pub mod types;

pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use matcher::{recognize, MatchError, MatchSettings, DEFAULT_DOWNSCALE, DEFAULT_TOLERANCE};
pub use oracle::{FaceOracle, OnnxOracle, OracleError};
pub use types::{Detection, Embedding, FaceBox, RecognizedFace, UNKNOWN_LABEL};
