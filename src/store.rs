use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Identity;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read roster at {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("roster at {} is corrupt: {}", .path.display(), .source)]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write roster at {}: {}", .path.display(), .source)]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize roster: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("roster is locked by another writer (remove {} if stale)", .lock.display())]
    Locked { lock: PathBuf },
    #[error("roster changed concurrently: expected revision {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },
}

impl StoreError {
    /// Whether the persisted roster could not be read at all.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Corrupt { .. })
    }
}

/// The registered identities, in scan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    pub users: Vec<Identity>,
    /// Revision this roster was loaded at. Saving requires it to still be current.
    pub revision: u64,
    /// Set once the first admin has been registered.
    pub sealed: bool,
}

impl Roster {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Trust-on-first-use applies only to a roster that has never held an admin.
    pub fn bootstrap_open(&self) -> bool {
        self.users.is_empty() && !self.sealed
    }

    pub fn admins_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Identity> + 'a {
        self.users
            .iter()
            .filter(move |u| u.is_admin() && u.name == name)
    }

    pub fn push(&mut self, identity: Identity) {
        self.users.push(identity);
    }
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    revision: u64,
    sealed: bool,
    users: &'a [Identity],
}

#[derive(Deserialize)]
struct Document {
    revision: u64,
    #[serde(default)]
    sealed: bool,
    users: Vec<Identity>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Persisted {
    Document(Document),
    /// Bare array of records, as written before revisions existed.
    Legacy(Vec<Identity>),
}

impl From<Persisted> for Roster {
    fn from(p: Persisted) -> Self {
        match p {
            Persisted::Document(doc) => Roster {
                users: doc.users,
                revision: doc.revision,
                sealed: doc.sealed,
            },
            Persisted::Legacy(users) => Roster {
                sealed: !users.is_empty(),
                users,
                revision: 0,
            },
        }
    }
}

/// JSON file holding the full roster, rewritten in full on every save.
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the roster. A missing file is an empty, unsealed roster.
    pub fn load(&self) -> Result<Roster, StoreError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No roster at {} yet", self.path.display());
                return Ok(Roster::default());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let persisted: Persisted =
            serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        let roster = Roster::from(persisted);
        debug!(
            "Loaded {} identities (revision {})",
            roster.users.len(),
            roster.revision
        );
        Ok(roster)
    }

    /// Replace the persisted roster and return the new revision.
    ///
    /// Fails with [`StoreError::Conflict`] when someone else saved since
    /// `roster` was loaded. The file is replaced by rename, so readers see
    /// either the old or the new roster.
    pub fn save(&self, roster: &Roster) -> Result<u64, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let _lock = StoreLock::acquire(&self.path)?;

        let found = self.load()?.revision;
        if found != roster.revision {
            return Err(StoreError::Conflict {
                expected: roster.revision,
                found,
            });
        }

        let revision = found + 1;
        let json = serde_json::to_vec_pretty(&DocumentRef {
            revision,
            sealed: roster.sealed,
            users: &roster.users,
        })
        .map_err(StoreError::Serialize)?;

        write_atomic(&self.path, &json)?;

        info!(
            "Saved {} identities to {} (revision {})",
            roster.users.len(),
            self.path.display(),
            revision
        );
        Ok(revision)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Write to a temp file, fsync, then rename over the destination.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp = sibling(path, &format!(".tmp.{}", std::process::id()));
    let write_err = |source| StoreError::Write {
        path: temp.clone(),
        source,
    };

    {
        let mut file = fs::File::create(&temp).map_err(write_err)?;
        file.write_all(data).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
    }

    fs::rename(&temp, path).map_err(|source| {
        let _ = fs::remove_file(&temp);
        StoreError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Exclusive lock file next to the roster, removed on drop.
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(roster: &Path) -> Result<Self, StoreError> {
        let path = sibling(roster, ".lock");
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::AlreadyExists => StoreError::Locked { lock: path.clone() },
                _ => StoreError::Write {
                    path: path.clone(),
                    source,
                },
            })?;
        // pid is informational only
        let _ = write!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> RecordStore {
        RecordStore::new(dir.path().join("database").join("users.json"))
    }

    fn sample() -> Vec<Identity> {
        vec![
            Identity::admin("Alice", "stored_faces/Alice.jpg"),
            Identity::user("Bob", "stored_faces/Bob.jpg"),
        ]
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let roster = store_in(&dir).load().unwrap();
        assert!(roster.is_empty());
        assert!(roster.bootstrap_open());
        assert_eq!(roster.revision, 0);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let roster = Roster {
            users: sample(),
            revision: 0,
            sealed: true,
        };

        let revision = store.save(&roster).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(revision, 1);
        assert_eq!(loaded.users, roster.users);
        assert_eq!(loaded.revision, 1);
        assert!(loaded.sealed);
        assert!(!sibling(store.path(), ".lock").exists());
    }

    #[test]
    fn test_saving_loaded_roster_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .save(&Roster {
                users: sample(),
                ..Roster::default()
            })
            .unwrap();

        let first = store.load().unwrap();
        store.save(&first).unwrap();
        let second = store.load().unwrap();

        assert_eq!(first.users, second.users);
        assert_eq!(second.revision, first.revision + 1);
    }

    #[test]
    fn test_stale_roster_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut tab_a = store.load().unwrap();
        let mut tab_b = store.load().unwrap();
        tab_a.push(Identity::admin("Alice", "a.jpg"));
        tab_b.push(Identity::admin("Mallory", "m.jpg"));

        store.save(&tab_a).unwrap();
        let err = store.save(&tab_b).unwrap_err();

        assert!(matches!(err, StoreError::Conflict { expected: 0, found: 1 }));
        assert_eq!(store.load().unwrap().users[0].name, "Alice");
    }

    #[test]
    fn test_held_lock_blocks_save() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(sibling(store.path(), ".lock"), "4242").unwrap();

        let err = store.save(&Roster::default()).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
        assert!(!err.is_read());
    }

    #[test]
    fn test_legacy_array_loads_sealed() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"[
    {
        "name": "Alice",
        "role": "Admin",
        "image_path": "stored_faces/Alice.jpg"
    }
]"#,
        )
        .unwrap();

        let roster = store.load().unwrap();
        assert_eq!(roster.users.len(), 1);
        assert_eq!(roster.revision, 0);
        assert!(roster.sealed);

        // first save upgrades the file to the versioned document
        store.save(&roster).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["revision"], 1);
        assert_eq!(raw["users"][0]["role"], "Admin");
    }

    #[test]
    fn test_corrupt_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err.is_read());
    }

    #[test]
    fn test_admins_named_is_exact() {
        let roster = Roster {
            users: sample(),
            ..Roster::default()
        };
        assert_eq!(roster.admins_named("Alice").count(), 1);
        assert_eq!(roster.admins_named("alice").count(), 0);
        assert_eq!(roster.admins_named("Bob").count(), 0);
    }
}
