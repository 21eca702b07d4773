//! Registration photo store.
//!
//! Layout: `<root>/<username>/<username>_<n>.jpg`, n starting at 1. Written
//! during registration and read back by the gallery builder, so a registered
//! username round-trips into gallery entry owners.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Photos captured per registration.
pub const PHOTOS_PER_USER: usize = 3;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid username {0:?}: must be non-empty and contain no path separators")]
    InvalidUsername(String),
    #[error("user not registered: {0}")]
    UnknownUser(String),
    #[error("photo store I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode photo: {0}")]
    Encode(#[from] image::ImageError),
}

/// Trim and validate a username for use as a directory name.
pub fn validate_username(raw: &str) -> Result<&str, StoreError> {
    let name = raw.trim();
    if name.is_empty()
        || name == ".."
        || name == "."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(StoreError::InvalidUsername(raw.to_string()));
    }
    Ok(name)
}

/// Directory holding one user's registration photos.
pub fn user_dir(root: &Path, username: &str) -> PathBuf {
    root.join(username)
}

/// Path of the n-th registration photo (1-based).
pub fn photo_path(root: &Path, username: &str, n: usize) -> PathBuf {
    user_dir(root, username).join(format!("{username}_{n}.jpg"))
}

pub fn user_exists(root: &Path, username: &str) -> bool {
    match validate_username(username) {
        Ok(name) => user_dir(root, name).is_dir(),
        Err(_) => false,
    }
}

/// Write the captured frames as the user's numbered JPEG photos, creating
/// the user directory (and root) as needed.
pub fn save_photos(
    root: &Path,
    username: &str,
    frames: &[RgbImage],
) -> Result<Vec<PathBuf>, StoreError> {
    let name = validate_username(username)?;
    let dir = user_dir(root, name);
    std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
        path: dir.clone(),
        source,
    })?;

    let mut saved = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let path = photo_path(root, name, i + 1);
        frame.save(&path)?;
        tracing::info!(path = %path.display(), "saved registration photo");
        saved.push(path);
    }
    Ok(saved)
}

/// Delete a user's photos. Used for `remove` and for the overwrite flow
/// before re-registration.
pub fn remove_user(root: &Path, username: &str) -> Result<(), StoreError> {
    let name = validate_username(username)?;
    let dir = user_dir(root, name);
    if !dir.is_dir() {
        return Err(StoreError::UnknownUser(name.to_string()));
    }
    std::fs::remove_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })
}

/// Registered usernames, sorted. A missing root means nobody has registered
/// yet and yields an empty list.
pub fn list_users(root: &Path) -> Result<Vec<String>, StoreError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let read = std::fs::read_dir(root).map_err(|source| StoreError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut users: Vec<String> = read
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(|s| s.trim().to_string()))
        .collect();
    users.sort();
    Ok(users)
}
