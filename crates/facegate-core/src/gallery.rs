//! In-memory gallery of registered face embeddings.
//!
//! Rebuilt from the registration photo tree on every use; embeddings are
//! never persisted, so a photo written before the next build is always
//! picked up.

use crate::oracle::{FaceOracle, OracleError};
use crate::types::Embedding;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery root not found: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("failed to scan {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// One registered photo: its embedding and the user it belongs to.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub owner: String,
    pub embedding: Embedding,
}

/// Ordered collection of gallery entries.
///
/// Order is deterministic (photo paths are sorted during the scan), which
/// makes the matcher's first-occurrence tie-break reproducible.
#[derive(Debug, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Build a gallery from a photo tree whose immediate subdirectories are
    /// usernames: `root/<user>/<photo>`.
    ///
    /// Undecodable photos and photos with no detectable face are skipped
    /// with a diagnostic. A missing root is an error; an empty tree is not.
    pub fn build(root: &Path, oracle: &mut dyn FaceOracle) -> Result<Gallery, GalleryError> {
        if !root.is_dir() {
            return Err(GalleryError::RootNotFound(root.to_path_buf()));
        }

        let mut entries = Vec::new();
        let mut scanned = 0usize;

        for user_dir in sorted_dir(root)? {
            if !user_dir.is_dir() {
                tracing::debug!(path = %user_dir.display(), "ignoring stray file in gallery root");
                continue;
            }
            let Some(owner) = user_dir.file_name().and_then(|n| n.to_str()) else {
                tracing::warn!(path = %user_dir.display(), "skipping non-UTF-8 user directory");
                continue;
            };
            let owner = owner.trim().to_string();

            for photo in sorted_dir(&user_dir)? {
                if !photo.is_file() {
                    continue;
                }
                scanned += 1;

                let img = match image::open(&photo) {
                    Ok(img) => img.to_rgb8(),
                    Err(err) => {
                        tracing::warn!(path = %photo.display(), %err, "could not read photo, skipping");
                        continue;
                    }
                };

                let (width, height) = img.dimensions();
                let faces = oracle.detect(img.as_raw(), width, height)?;
                let Some(first) = faces.first() else {
                    tracing::info!(path = %photo.display(), "no face found in photo, skipping");
                    continue;
                };

                // Take the first (highest-confidence) face only.
                let Some(embedding) = oracle
                    .embed(img.as_raw(), width, height, std::slice::from_ref(first))?
                    .into_iter()
                    .next()
                else {
                    tracing::warn!(path = %photo.display(), "oracle returned no embedding, skipping");
                    continue;
                };

                entries.push(GalleryEntry {
                    owner: owner.clone(),
                    embedding,
                });
            }
        }

        tracing::info!(photos = scanned, entries = entries.len(), "gallery loaded");
        Ok(Gallery { entries })
    }

    /// Build a gallery directly from entries. Used by callers that manage
    /// their own embedding source, and by tests.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Gallery {
        Gallery { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct owners, sorted.
    pub fn owners(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.owner.as_str()).collect()
    }

    /// The entry nearest to `probe` and its distance, or `None` for an
    /// empty gallery. Exact ties keep the first entry in gallery order.
    pub fn nearest(&self, probe: &Embedding) -> Option<(&GalleryEntry, f32)> {
        let mut best: Option<(&GalleryEntry, f32)> = None;
        for entry in &self.entries {
            let dist = probe.distance(&entry.embedding);
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((entry, dist)),
            }
        }
        best
    }
}

/// Directory entries sorted by path, for a deterministic gallery order.
fn sorted_dir(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let read = std::fs::read_dir(dir).map_err(|source| GalleryError::Scan {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Detection, FaceBox};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    /// Scripted oracle: an all-black image has no face; anything else has
    /// exactly one face whose embedding is the mean RGB color.
    struct ColorOracle;

    impl FaceOracle for ColorOracle {
        fn detect(
            &mut self,
            rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<Detection>, OracleError> {
            if rgb.iter().all(|&b| b == 0) {
                return Ok(vec![]);
            }
            Ok(vec![Detection {
                location: FaceBox { top: 0.0, right: 8.0, bottom: 8.0, left: 0.0 },
                confidence: 0.9,
                landmarks: None,
            }])
        }

        fn embed(
            &mut self,
            rgb: &[u8],
            _width: u32,
            _height: u32,
            faces: &[Detection],
        ) -> Result<Vec<Embedding>, OracleError> {
            let n = (rgb.len() / 3).max(1) as f32;
            let mut mean = [0.0f32; 3];
            for px in rgb.chunks_exact(3) {
                for c in 0..3 {
                    mean[c] += px[c] as f32 / 255.0;
                }
            }
            let emb = Embedding::new(mean.iter().map(|v| v / n).collect());
            Ok(faces.iter().map(|_| emb.clone()).collect())
        }
    }

    fn write_photo(dir: &Path, name: &str, color: [u8; 3]) {
        let img = RgbImage::from_pixel(16, 16, Rgb(color));
        img.save(dir.join(name)).unwrap();
    }

    fn make_tree(root: &Path) {
        let alice = root.join("alice");
        let bob = root.join("bob");
        std::fs::create_dir_all(&alice).unwrap();
        std::fs::create_dir_all(&bob).unwrap();
        write_photo(&alice, "alice_1.jpg", [200, 10, 10]);
        write_photo(&alice, "alice_2.jpg", [190, 20, 10]);
        write_photo(&bob, "bob_1.jpg", [10, 10, 200]);
    }

    #[test]
    fn test_build_owners_and_count() {
        let tmp = TempDir::new().unwrap();
        make_tree(tmp.path());

        let gallery = Gallery::build(tmp.path(), &mut ColorOracle).unwrap();
        assert_eq!(gallery.len(), 3);
        assert_eq!(
            gallery.owners().into_iter().collect::<Vec<_>>(),
            vec!["alice", "bob"]
        );
    }

    #[test]
    fn test_build_missing_root() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("no-such-dir");
        match Gallery::build(&missing, &mut ColorOracle) {
            Err(GalleryError::RootNotFound(path)) => assert_eq!(path, missing),
            other => panic!("expected RootNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_build_skips_unreadable_and_faceless() {
        let tmp = TempDir::new().unwrap();
        make_tree(tmp.path());

        // Garbage bytes with an image extension: skipped, not fatal.
        std::fs::write(tmp.path().join("alice/broken.jpg"), b"not an image").unwrap();
        // All-black photo: the oracle finds no face, skipped.
        write_photo(&tmp.path().join("bob"), "bob_dark.jpg", [0, 0, 0]);

        let gallery = Gallery::build(tmp.path(), &mut ColorOracle).unwrap();
        assert_eq!(gallery.len(), 3);
    }

    #[test]
    fn test_build_empty_tree_is_ok() {
        let tmp = TempDir::new().unwrap();
        let gallery = Gallery::build(tmp.path(), &mut ColorOracle).unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_rebuild_sees_new_user() {
        // Freshness: a photo written between builds appears in the next one.
        let tmp = TempDir::new().unwrap();
        make_tree(tmp.path());

        let before = Gallery::build(tmp.path(), &mut ColorOracle).unwrap();
        assert!(!before.owners().contains("carol"));

        let carol = tmp.path().join("carol");
        std::fs::create_dir_all(&carol).unwrap();
        write_photo(&carol, "carol_1.jpg", [10, 200, 10]);

        let after = Gallery::build(tmp.path(), &mut ColorOracle).unwrap();
        assert!(after.owners().contains("carol"));
        assert_eq!(after.len(), before.len() + 1);
    }

    #[test]
    fn test_owner_name_is_trimmed() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(" dave ");
        std::fs::create_dir_all(&dir).unwrap();
        write_photo(&dir, "dave_1.jpg", [120, 120, 120]);

        let gallery = Gallery::build(tmp.path(), &mut ColorOracle).unwrap();
        assert_eq!(gallery.entries()[0].owner, "dave");
    }

    #[test]
    fn test_nearest_empty() {
        let gallery = Gallery::default();
        assert!(gallery.nearest(&Embedding::new(vec![1.0, 0.0])).is_none());
    }

    #[test]
    fn test_nearest_exact_match() {
        let gallery = Gallery::from_entries(vec![
            GalleryEntry {
                owner: "alice".into(),
                embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
            },
            GalleryEntry {
                owner: "bob".into(),
                embedding: Embedding::new(vec![0.0, 1.0, 0.0]),
            },
        ]);

        let (entry, dist) = gallery.nearest(&Embedding::new(vec![0.0, 1.0, 0.0])).unwrap();
        assert_eq!(entry.owner, "bob");
        assert_eq!(dist, 0.0);
    }

    #[test]
    fn test_nearest_tie_keeps_first() {
        let shared = Embedding::new(vec![0.5, 0.5]);
        let gallery = Gallery::from_entries(vec![
            GalleryEntry { owner: "first".into(), embedding: shared.clone() },
            GalleryEntry { owner: "second".into(), embedding: shared },
        ]);

        let (entry, _) = gallery.nearest(&Embedding::new(vec![0.5, 0.5])).unwrap();
        assert_eq!(entry.owner, "first");
    }
}
