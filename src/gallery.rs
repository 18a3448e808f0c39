use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use log::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result, ValidationError};

/// Reference images, one JPEG per identity name, plus a scratch area for
/// submitted images that only live for one request.
pub struct Gallery {
    faces_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl Gallery {
    pub fn new(faces_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            faces_dir: faces_dir.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn faces_dir(&self) -> &Path {
        &self.faces_dir
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Where the reference image for `name` lives. Same name, same file.
    pub fn reference_path(&self, name: &str) -> PathBuf {
        self.faces_dir.join(format!("{name}.jpg"))
    }

    /// Decode a submitted image and write it to scratch storage.
    pub fn stage(&self, bytes: &[u8]) -> Result<ScratchImage> {
        let img = decode(bytes)?;
        fs::create_dir_all(&self.scratch_dir).map_err(|e| Error::image(&self.scratch_dir, e))?;

        let path = self
            .scratch_dir
            .join(format!("temp_{}.jpg", Uuid::new_v4().simple()));
        // Armed before writing so a partial file is still cleaned up.
        let scratch = ScratchImage {
            path,
            armed: true,
        };
        write_jpeg(&img, &scratch.path)?;
        debug!("Staged submitted image at {}", scratch.path.display());
        Ok(scratch)
    }

    /// Decode `bytes` into a pending reference image for `name`.
    pub fn prepare(&self, name: &str, bytes: &[u8]) -> Result<PendingReference> {
        let img = decode(bytes)?;
        let pending = self.pending(name)?;
        write_jpeg(&img, &pending.staged)?;
        Ok(pending)
    }

    /// Move a submitted image out of scratch storage into a pending
    /// reference image for `name`.
    pub fn promote(&self, scratch: ScratchImage, name: &str) -> Result<PendingReference> {
        let pending = self.pending(name)?;
        scratch.persist(&pending.staged)?;
        Ok(pending)
    }

    /// Staged file next to the final reference path. Nothing touches
    /// `<name>.jpg` until [`PendingReference::commit`].
    fn pending(&self, name: &str) -> Result<PendingReference> {
        fs::create_dir_all(&self.faces_dir).map_err(|e| Error::image(&self.faces_dir, e))?;
        let dest = self.reference_path(name);
        let staged = self
            .faces_dir
            .join(format!("{name}.jpg.{}", Uuid::new_v4().simple()));
        Ok(PendingReference {
            staged,
            dest,
            armed: true,
        })
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {}", path.display(), e),
    }
}

/// A reference image written under a unique name, waiting for the roster
/// save that makes it official. Removed on drop unless committed.
#[derive(Debug)]
pub struct PendingReference {
    staged: PathBuf,
    dest: PathBuf,
    armed: bool,
}

impl PendingReference {
    /// Final location, valid to record in the roster before committing.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn staged(&self) -> &Path {
        &self.staged
    }

    /// Rename the staged file onto the reference path.
    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.staged, &self.dest).map_err(|e| Error::image(&self.dest, e))?;
        self.armed = false;
        Ok(std::mem::take(&mut self.dest))
    }
}

impl Drop for PendingReference {
    fn drop(&mut self) {
        if self.armed {
            remove_quietly(&self.staged);
        }
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| ValidationError::UnreadableImage(e).into())
}

fn write_jpeg(img: &DynamicImage, path: &Path) -> Result<()> {
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(img.to_rgb8())
        .save_with_format(path, ImageFormat::Jpeg)
        .map_err(|source| Error::Encode {
            path: path.to_path_buf(),
            source,
        })
}

/// A submitted image in scratch storage, deleted when dropped unless persisted.
#[derive(Debug)]
pub struct ScratchImage {
    path: PathBuf,
    armed: bool,
}

impl ScratchImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the image to `dest`, taking it out of scratch storage.
    pub fn persist(mut self, dest: &Path) -> Result<()> {
        match fs::rename(&self.path, dest) {
            Ok(()) => self.armed = false,
            // rename cannot cross filesystems; copy and let drop clean up
            Err(_) => {
                fs::copy(&self.path, dest).map_err(|e| Error::image(dest, e))?;
            }
        }
        Ok(())
    }
}

impl Drop for ScratchImage {
    fn drop(&mut self) {
        if self.armed {
            remove_quietly(&self.path);
        }
    }
}
