use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to compare one pair of images.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("image not found: {}", .0.display())]
    MissingImage(PathBuf),
    #[error("failed to launch verifier `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no face detected: {0}")]
    NoFace(String),
    #[error("verifier exited with code {code:?}: {message}")]
    Rejected { code: Option<i32>, message: String },
    #[error("malformed verifier output: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Verdict for a single probe/reference pair.
///
/// Only `verified` is required; the remaining fields are whatever the
/// backend chose to report alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: bool,
    #[serde(default)]
    pub distance: Option<f32>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Verification {
    pub fn matched() -> Self {
        Self {
            verified: true,
            distance: None,
            threshold: None,
            model: None,
        }
    }

    pub fn rejected() -> Self {
        Self {
            verified: false,
            ..Self::matched()
        }
    }
}

/// Decides whether two face images depict the same person.
pub trait Verifier {
    fn verify(&self, probe: &Path, reference: &Path) -> Result<Verification, VerifyError>;
}

impl<V: Verifier + ?Sized> Verifier for &V {
    fn verify(&self, probe: &Path, reference: &Path) -> Result<Verification, VerifyError> {
        (**self).verify(probe, reference)
    }
}

impl<V: Verifier + ?Sized> Verifier for Box<V> {
    fn verify(&self, probe: &Path, reference: &Path) -> Result<Verification, VerifyError> {
        (**self).verify(probe, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_verdict() {
        let v: Verification = serde_json::from_str(r#"{"verified": true}"#).unwrap();
        assert_eq!(v, Verification::matched());
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let raw = r#"{
            "verified": false,
            "distance": 0.71,
            "threshold": 0.4,
            "model": "Facenet",
            "detector_backend": "opencv",
            "facial_areas": {"img1": {"x": 1}}
        }"#;
        let v: Verification = serde_json::from_str(raw).unwrap();
        assert!(!v.verified);
        assert_eq!(v.model.as_deref(), Some("Facenet"));
        assert!((v.distance.unwrap() - 0.71).abs() < 1e-6);
    }

    #[test]
    fn test_missing_verified_is_malformed() {
        let err = serde_json::from_str::<Verification>(r#"{"distance": 0.2}"#).unwrap_err();
        let err = VerifyError::from(err);
        assert!(matches!(err, VerifyError::Malformed(_)));
    }
}
