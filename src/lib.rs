pub mod access;
pub mod config;
pub mod error;
pub mod gallery;
pub mod identity;
pub mod matcher;
pub mod store;

pub use access::{AccessControl, Decision, Outcome, Registration};
pub use error::{Error, Result, ValidationError};
pub use identity::{Identity, Role};

// Re-export verification types for convenience
pub use facegate_verify::{CommandVerifier, Verification, Verifier, VerifyError, VerifyOptions};
