use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("Admin"),
            Role::User => f.write_str("User"),
        }
    }
}

/// A registered person and the reference image their face is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub role: Role,
    pub image_path: PathBuf,
}

impl Identity {
    pub fn admin(name: impl Into<String>, image_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            role: Role::Admin,
            image_path: image_path.into(),
        }
    }

    pub fn user(name: impl Into<String>, image_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            role: Role::User,
            image_path: image_path.into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Checks a display name for use as an identity and as its image file name.
///
/// Surrounding whitespace is dropped; an empty result counts as a missing field.
pub fn validate_name<'a>(field: &'static str, name: &'a str) -> Result<&'a str, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if name == "." || name == ".." || name.contains(&['/', '\\', '\0'][..]) {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(name)
}
