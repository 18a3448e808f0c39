//! Access decisions and admin-gated registration.
//!
//! Every call reloads the roster from disk, so each operation sees the state
//! left by the previous one (or by another process).

use std::fmt;

use facegate_verify::Verifier;
use log::{info, warn};

use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::gallery::{Gallery, ScratchImage};
use crate::identity::{validate_name, Identity};
use crate::matcher::{self, Skipped};
use crate::store::{RecordStore, Roster};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The roster was empty; the submitter became its first Admin.
    Bootstrapped { name: String },
    Granted { name: String },
    Denied,
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        !matches!(self, Decision::Denied)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Bootstrapped { name } | Decision::Granted { name } => f.write_str(name),
            Decision::Denied => f.write_str("denied"),
        }
    }
}

#[derive(Debug)]
pub struct Outcome {
    pub decision: Decision,
    /// Identities the verifier failed on during the scan.
    pub skipped: Vec<Skipped>,
}

/// Request to add a User, vouched for by an Admin's name and face.
#[derive(Debug, Clone, Copy)]
pub struct Registration<'a> {
    pub admin: &'a str,
    pub admin_image: &'a [u8],
    pub name: &'a str,
    pub image: &'a [u8],
}

pub struct AccessControl<V> {
    store: RecordStore,
    gallery: Gallery,
    verifier: V,
}

impl<V: Verifier> AccessControl<V> {
    pub fn new(store: RecordStore, gallery: Gallery, verifier: V) -> Self {
        Self {
            store,
            gallery,
            verifier,
        }
    }

    pub fn from_config(cfg: &Config, verifier: V) -> Self {
        Self::new(
            RecordStore::new(&cfg.database),
            Gallery::new(&cfg.faces_dir, &cfg.scratch_dir),
            verifier,
        )
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Registered identities in scan order.
    pub fn members(&self) -> Result<Vec<Identity>> {
        Ok(self.store.load()?.users)
    }

    /// Decide access for a submitted image.
    ///
    /// On a never-bootstrapped roster the submitter is registered as Admin
    /// under `name` without any face check. Otherwise the image is compared
    /// against every identity in order and the first match is granted.
    pub fn submit(&self, image: &[u8], name: Option<&str>) -> Result<Outcome> {
        if image.is_empty() {
            return Err(ValidationError::MissingField("image").into());
        }
        let scratch = self.gallery.stage(image)?;
        let roster = self.store.load()?;

        if roster.bootstrap_open() {
            return self.bootstrap(roster, scratch, name.unwrap_or_default());
        }
        if roster.is_empty() {
            info!("Roster is empty but already bootstrapped; nobody can be granted");
        }

        let report = matcher::first_match(&self.verifier, scratch.path(), &roster.users);
        let decision = match report.matched {
            Some(idx) => Decision::Granted {
                name: roster.users[idx].name.clone(),
            },
            None => Decision::Denied,
        };
        info!(
            "Access decision: {} ({} of {} identities skipped)",
            decision,
            report.skipped.len(),
            roster.users.len()
        );

        Ok(Outcome {
            decision,
            skipped: report.skipped,
        })
    }

    fn bootstrap(&self, mut roster: Roster, scratch: ScratchImage, name: &str) -> Result<Outcome> {
        let name = validate_name("admin name", name)?;
        // staged under a unique name; dropped without touching <name>.jpg if the save fails
        let pending = self.gallery.promote(scratch, name)?;

        roster.push(Identity::admin(name, pending.dest()));
        roster.sealed = true;
        self.store.save(&roster)?;
        pending.commit()?;

        info!("Bootstrapped {} as the first Admin", name);
        Ok(Outcome {
            decision: Decision::Bootstrapped {
                name: name.to_string(),
            },
            skipped: Vec::new(),
        })
    }

    /// Add a User on behalf of an Admin.
    ///
    /// The admin is identified by exact name and must also present a face
    /// that matches one of that admin's reference images.
    pub fn register(&self, req: &Registration<'_>) -> Result<Identity> {
        let mut roster = self.store.load()?;

        let admins: Vec<Identity> = roster.admins_named(req.admin).cloned().collect();
        if admins.is_empty() {
            return Err(ValidationError::NotAdmin(req.admin.to_string()).into());
        }

        let name = validate_name("user name", req.name)?;
        if req.image.is_empty() {
            return Err(ValidationError::MissingField("user image").into());
        }
        if req.admin_image.is_empty() {
            return Err(ValidationError::MissingField("admin image").into());
        }

        let probe = self.gallery.stage(req.admin_image)?;
        let report = matcher::first_match(&self.verifier, probe.path(), &admins);
        drop(probe);
        if report.matched.is_none() {
            warn!("Registration refused: face did not match admin {}", req.admin);
            return Err(ValidationError::AdminNotVerified(req.admin.to_string()).into());
        }

        if roster.users.iter().any(|u| u.name == name) {
            warn!(
                "{} is already registered; the new reference image replaces the old one",
                name
            );
        }

        let pending = self.gallery.prepare(name, req.image)?;
        let identity = Identity::user(name, pending.dest());
        roster.push(identity.clone());
        self.store.save(&roster)?;
        pending.commit()?;

        info!("{} registered {} as User", req.admin, name);
        Ok(identity)
    }
}
