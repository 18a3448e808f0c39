use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::verifier::{Verification, Verifier, VerifyError};

/// How to reach the external verification tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    pub program: String,
    /// Extra arguments placed before the image pair.
    pub args: Vec<String>,
    pub model: String,
    /// Fail the comparison when no face is found instead of comparing the whole frame.
    pub enforce_detection: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            program: "deepface-verify".to_string(),
            args: Vec::new(),
            model: "Facenet".to_string(),
            enforce_detection: true,
        }
    }
}

/// Runs one child process per comparison:
///
/// ```text
/// <program> <args...> --img1 <probe> --img2 <reference> --model <model> --enforce-detection <bool>
/// ```
///
/// A zero exit status with a JSON [`Verification`] on stdout is a verdict.
/// Anything else is a [`VerifyError`] for that pair.
pub struct CommandVerifier {
    options: VerifyOptions,
}

impl CommandVerifier {
    pub fn new(options: VerifyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    fn command(&self, probe: &Path, reference: &Path) -> Command {
        let mut cmd = Command::new(&self.options.program);
        cmd.args(&self.options.args)
            .arg("--img1")
            .arg(probe)
            .arg("--img2")
            .arg(reference)
            .arg("--model")
            .arg(&self.options.model)
            .arg("--enforce-detection")
            .arg(self.options.enforce_detection.to_string());
        cmd
    }
}

impl Verifier for CommandVerifier {
    fn verify(&self, probe: &Path, reference: &Path) -> Result<Verification, VerifyError> {
        for path in [probe, reference] {
            if !path.is_file() {
                return Err(VerifyError::MissingImage(path.to_path_buf()));
            }
        }

        let output = self
            .command(probe, reference)
            .output()
            .map_err(|source| VerifyError::Spawn {
                program: self.options.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(output.status.code(), last_line(&stderr)));
        }

        let verdict: Verification = serde_json::from_slice(&output.stdout)?;
        log::debug!(
            "{} vs {}: verified={} distance={:?} threshold={:?}",
            probe.display(),
            reference.display(),
            verdict.verified,
            verdict.distance,
            verdict.threshold
        );
        Ok(verdict)
    }
}

/// Python-style tools print a traceback; the final line carries the reason.
fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn classify_failure(code: Option<i32>, message: String) -> VerifyError {
    if message.to_ascii_lowercase().contains("could not be detected") {
        VerifyError::NoFace(message)
    } else {
        VerifyError::Rejected { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_default_options() {
        let opts = VerifyOptions::default();
        assert_eq!(opts.model, "Facenet");
        assert!(opts.enforce_detection);
        assert!(opts.args.is_empty());
    }

    #[test]
    fn test_command_layout() {
        let verifier = CommandVerifier::new(VerifyOptions {
            program: "verify-tool".into(),
            args: vec!["run".into()],
            model: "ArcFace".into(),
            enforce_detection: false,
        });
        let cmd = verifier.command(Path::new("a.jpg"), Path::new("b.jpg"));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(cmd.get_program(), "verify-tool");
        assert_eq!(
            args,
            [
                "run",
                "--img1",
                "a.jpg",
                "--img2",
                "b.jpg",
                "--model",
                "ArcFace",
                "--enforce-detection",
                "false"
            ]
            .map(OsStr::new)
        );
    }

    #[test]
    fn test_last_line_skips_trailing_blank() {
        let stderr = "Traceback (most recent call last):\n  File \"x.py\"\nValueError: boom\n\n";
        assert_eq!(last_line(stderr), "ValueError: boom");
        assert_eq!(last_line(""), "");
    }

    #[test]
    fn test_classify_no_face() {
        let err = classify_failure(
            Some(1),
            "ValueError: Face could not be detected in numpy array.".into(),
        );
        assert!(matches!(err, VerifyError::NoFace(_)));

        let err = classify_failure(Some(2), "model weights missing".into());
        assert!(matches!(err, VerifyError::Rejected { code: Some(2), .. }));
    }

    #[test]
    fn test_missing_image_short_circuits() {
        let verifier = CommandVerifier::new(VerifyOptions::default());
        let err = verifier
            .verify(Path::new("/nonexistent/probe.jpg"), Path::new("/nonexistent/ref.jpg"))
            .unwrap_err();
        assert!(matches!(err, VerifyError::MissingImage(p) if p.ends_with("probe.jpg")));
    }
}
