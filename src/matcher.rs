use std::path::Path;

use facegate_verify::Verifier;
use log::{debug, warn};

use crate::identity::Identity;

/// An identity the verifier could not compare against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    /// Index of the first candidate that matched.
    pub matched: Option<usize>,
    pub skipped: Vec<Skipped>,
}

/// Compare `probe` against each candidate's reference image in order and stop
/// at the first positive verdict.
///
/// A verifier error counts as "no match" for that candidate only; it is logged
/// under the `facegate::scan` target and reported in [`ScanReport::skipped`].
pub fn first_match<V: Verifier + ?Sized>(
    verifier: &V,
    probe: &Path,
    candidates: &[Identity],
) -> ScanReport {
    let mut report = ScanReport::default();

    for (idx, candidate) in candidates.iter().enumerate() {
        match verifier.verify(probe, &candidate.image_path) {
            Ok(verdict) if verdict.verified => {
                debug!("{} matched (distance {:?})", candidate.name, verdict.distance);
                report.matched = Some(idx);
                return report;
            }
            Ok(verdict) => {
                debug!("{} did not match (distance {:?})", candidate.name, verdict.distance);
            }
            Err(e) => {
                warn!(
                    target: "facegate::scan",
                    "skipped {} ({}): {}",
                    candidate.name,
                    candidate.image_path.display(),
                    e
                );
                report.skipped.push(Skipped {
                    name: candidate.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_verify::{Verification, VerifyError};
    use std::cell::RefCell;

    /// Matches references whose file stem is listed; errors on "broken".
    struct StemVerifier {
        accept: &'static [&'static str],
        seen: RefCell<Vec<String>>,
    }

    impl Verifier for StemVerifier {
        fn verify(&self, _probe: &Path, reference: &Path) -> Result<Verification, VerifyError> {
            let stem = reference.file_stem().unwrap().to_string_lossy().into_owned();
            self.seen.borrow_mut().push(stem.clone());
            if stem == "broken" {
                return Err(VerifyError::NoFace("Face could not be detected".into()));
            }
            Ok(if self.accept.contains(&stem.as_str()) {
                Verification::matched()
            } else {
                Verification::rejected()
            })
        }
    }

    fn candidates(names: &[&str]) -> Vec<Identity> {
        names
            .iter()
            .map(|n| Identity::user(*n, format!("faces/{n}.jpg")))
            .collect()
    }

    #[test]
    fn test_first_match_wins() {
        let verifier = StemVerifier {
            accept: &["bob", "carol"],
            seen: RefCell::default(),
        };
        let users = candidates(&["alice", "bob", "carol"]);
        let report = first_match(&verifier, Path::new("submitted.jpg"), &users);

        assert_eq!(report.matched, Some(1));
        assert_eq!(*verifier.seen.borrow(), ["alice", "bob"]);
    }

    #[test]
    fn test_errors_are_skipped() {
        let verifier = StemVerifier {
            accept: &["carol"],
            seen: RefCell::default(),
        };
        let users = candidates(&["broken", "bob", "carol"]);
        let report = first_match(&verifier, Path::new("submitted.jpg"), &users);

        assert_eq!(report.matched, Some(2));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "broken");
        assert!(report.skipped[0].reason.contains("no face detected"));
    }

    #[test]
    fn test_exhausted_scan() {
        let verifier = StemVerifier {
            accept: &[],
            seen: RefCell::default(),
        };
        let users = candidates(&["alice", "broken"]);
        let report = first_match(&verifier, Path::new("submitted.jpg"), &users);
        assert_eq!(report.matched, None);
        assert_eq!(verifier.seen.borrow().len(), 2);

        let report = first_match(&verifier, Path::new("probe.jpg"), &[]);
        assert_eq!(report.matched, None);
        assert!(report.skipped.is_empty());
    }
}
