use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Rejected operator input. Shown to the operator as a warning, never fatal.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid name {0:?}: a name must be usable as a file name")]
    InvalidName(String),
    #[error("submitted image could not be decoded: {0}")]
    UnreadableImage(#[source] image::ImageError),
    #[error("no admin named {0:?} is registered")]
    NotAdmin(String),
    #[error("face did not match the reference image of admin {0:?}")]
    AdminNotVerified(String),
}

impl ValidationError {
    /// Operator-facing message.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "Fill all fields.",
            Self::InvalidName(_) => "Names cannot contain path separators.",
            Self::UnreadableImage(_) => "Upload a jpg, jpeg or png image.",
            Self::NotAdmin(_) => "Only Admin can add users.",
            Self::AdminNotVerified(_) => "Only Admin can add users. Admin face was not recognised.",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("image storage failed at {}: {}", .path.display(), .source)]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode image at {}: {}", .path.display(), .source)]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl Error {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn image(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
