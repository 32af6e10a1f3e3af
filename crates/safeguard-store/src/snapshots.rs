//! Snapshot directory.
//!
//! Violation snapshots are JPEG files named `vio_{camera}_{unix_seconds}.jpg`
//! stored flat in one directory. Records reference them either by bare file
//! name or by `{public_base}/{file_name}` when a public base URL is set.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use safeguard_models::CameraId;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// JPEG quality for snapshots.
pub const SNAPSHOT_JPEG_QUALITY: u8 = 90;

/// Flat directory of violation snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
    public_base: Option<String>,
}

impl SnapshotDir {
    /// Use `root`, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>, public_base: Option<String>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            public_base: public_base.map(|b| b.trim_end_matches('/').to_string()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name for a snapshot taken on `camera_id` at `at`.
    pub fn file_name_for(camera_id: &CameraId, at: DateTime<Utc>) -> String {
        format!("vio_{}_{}.jpg", camera_id, at.timestamp())
    }

    /// Path of `name` inside the directory. Rejects anything but a plain file name.
    pub fn path_for(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Value stored in `snapshot_ref` for `name`.
    pub fn reference_for(&self, name: &str) -> String {
        match &self.public_base {
            Some(base) => format!("{}/{}", base, name),
            None => name.to_string(),
        }
    }

    /// File name referenced by a `snapshot_ref`, if it is a valid one.
    pub fn name_from_reference(&self, reference: &str) -> Option<String> {
        let name = match &self.public_base {
            Some(base) => reference
                .strip_prefix(base.as_str())
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or_else(|| reference.rsplit('/').next().unwrap_or(reference)),
            None => reference.rsplit('/').next().unwrap_or(reference),
        };
        validate_name(name).ok().map(|_| name.to_string())
    }

    /// Encode `image` as JPEG and write it as `name`.
    ///
    /// Existing files are never replaced; writing a name that is already
    /// taken fails with [`StoreError::Duplicate`].
    pub async fn write_jpeg(&self, name: &str, image: &RgbImage) -> StoreResult<PathBuf> {
        let path = self.path_for(name)?;

        let mut buffer = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buffer, SNAPSHOT_JPEG_QUALITY).encode_image(image)?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::duplicate(name));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(buffer.get_ref()).await?;
        file.flush().await?;

        debug!(path = %path.display(), "Snapshot written");
        Ok(path)
    }

    /// Raw bytes of a snapshot.
    pub async fn read(&self, name: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a snapshot. Returns `Ok(false)` when it did not exist.
    pub async fn remove(&self, name: &str) -> StoreResult<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the file behind a `snapshot_ref`, logging instead of failing.
    ///
    /// Returns true only when a file was actually removed.
    pub async fn remove_referenced(&self, reference: &str) -> bool {
        let Some(name) = self.name_from_reference(reference) else {
            warn!(reference = %reference, "Snapshot reference does not name a file");
            return false;
        };

        match self.remove(&name).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to delete snapshot");
                false
            }
        }
    }
}

/// Accept only plain file names: no separators, no `.`/`..`, no NUL.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        Err(StoreError::invalid_name(name))
    } else {
        Ok(())
    }
}
