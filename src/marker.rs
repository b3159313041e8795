use crate::error::{BootstrapError, Result};
use crate::fs::Filesystem;
use crate::identity::Identity;
use nix::fcntl::{Flock, FlockArg};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Version of the on-disk marker layout. Version 1 is the bare `UID:GID`
/// string.
pub const MARKER_SCHEMA_VERSION: u32 = 1;

/// Identity applied by the last successful bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkerRecord {
    pub version: u32,
    pub identity: Identity,
}

impl MarkerRecord {
    pub fn new(identity: Identity) -> Self {
        Self {
            version: MARKER_SCHEMA_VERSION,
            identity,
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let content = content.trim();
        let (uid, gid) = content
            .split_once(':')
            .ok_or_else(|| BootstrapError::Marker(format!("expected UID:GID, got '{}'", content)))?;
        let parse = |field: &str, value: &str| {
            value.parse::<u32>().map_err(|_| {
                BootstrapError::Marker(format!("invalid {} '{}' in '{}'", field, value, content))
            })
        };
        Ok(Self::new(Identity::new(parse("uid", uid)?, parse("gid", gid)?)))
    }

    pub fn encode(&self) -> String {
        self.identity.to_string()
    }
}

/// Fast path holds when the stored marker records exactly the requested
/// identity.
pub fn is_fast_path(stored: Option<&MarkerRecord>, requested: Identity) -> bool {
    stored.is_some_and(|record| record.identity == requested)
}

/// Reads and writes the marker through a [`Filesystem`].
pub struct MarkerStore<'a> {
    fs: &'a dyn Filesystem,
    path: PathBuf,
}

impl<'a> MarkerStore<'a> {
    pub fn new(fs: &'a dyn Filesystem, path: PathBuf) -> Self {
        Self { fs, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable marker yields `None`, forcing a full pass.
    pub fn load(&self) -> Option<MarkerRecord> {
        if !self.fs.exists(&self.path) {
            debug!("No marker at {}", self.path.display());
            return None;
        }
        let content = match self.fs.read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Ignoring unreadable marker {}: {}", self.path.display(), e);
                return None;
            }
        };
        match MarkerRecord::parse(&content) {
            Ok(record) => {
                debug!("Marker {} records {}", self.path.display(), record.identity);
                Some(record)
            }
            Err(e) => {
                warn!("Ignoring corrupt marker {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, record: &MarkerRecord) -> Result<()> {
        self.fs.write(&self.path, &record.encode()).map_err(|e| {
            BootstrapError::Marker(format!(
                "Failed to write marker {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Exclusive advisory lock held for the duration of a bootstrap pass. The
/// descriptor is close-on-exec, so the lock is released at workload handoff.
pub struct BootstrapLock {
    _lock: Flock<File>,
}

impl BootstrapLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((file, _)) => {
                info!(
                    "Another bootstrap holds {}, waiting for it to finish",
                    path.display()
                );
                Flock::lock(file, FlockArg::LockExclusive)
                    .map_err(|(_, errno)| std::io::Error::from(errno))?
            }
        };
        debug!("Acquired bootstrap lock {}", path.display());
        Ok(Self { _lock: lock })
    }
}
