//! The face verification capability consumed by facegate.
//!
//! The comparison itself is a black box: a [`Verifier`] answers whether two
//! images depict the same person. [`CommandVerifier`] reaches an external
//! verification tool as a child process and reads its JSON verdict.

pub mod command;
pub mod verifier;

// Re-export commonly used types
pub use command::{CommandVerifier, VerifyOptions};
pub use verifier::{Verification, Verifier, VerifyError};
