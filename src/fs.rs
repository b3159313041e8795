use crate::error::{BootstrapError, Result};
use crate::identity::Identity;
use std::fs;
use std::os::unix::fs::{lchown, symlink, MetadataExt};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Filesystem operations the bootstrap steps need.
pub trait Filesystem: Send + Sync {
    /// Whether anything (including a dangling symlink) exists at `path`
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn is_empty_dir(&self, path: &Path) -> Result<bool>;

    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Create or replace `path`, creating missing parent directories
    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    /// Copy one file, preserving mode and mtime, creating missing parents
    fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy every entry of `from` into `to` that does not already exist there.
    /// Existing entries are never replaced. Returns the number of entries copied.
    fn copy_tree_missing(&self, from: &Path, to: &Path) -> Result<usize>;

    /// Owner of `path` itself (symlinks are followed)
    fn owner(&self, path: &Path) -> Result<Identity>;

    /// Re-own `root` and everything below it, without following symlinks and
    /// without descending into any of `exclude`. Returns the number of entries
    /// whose ownership changed.
    fn chown_recursive(&self, root: &Path, identity: Identity, exclude: &[&Path])
        -> Result<usize>;
}

/// The real filesystem of the container.
pub struct HostFilesystem;

impl HostFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HostFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for HostFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.symlink_metadata().is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_empty_dir(&self, path: &Path) -> Result<bool> {
        Ok(fs::read_dir(path)?.next().is_none())
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_preserving(from, to)
    }

    fn copy_tree_missing(&self, from: &Path, to: &Path) -> Result<usize> {
        let mut copied = 0;
        let mut walker = WalkDir::new(from).min_depth(1).follow_links(false).into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry.path().strip_prefix(from).map_err(|e| {
                BootstrapError::Config(format!("{}: {}", entry.path().display(), e))
            })?;
            let dest = to.join(relative);
            let file_type = entry.file_type();

            if let Ok(existing) = dest.symlink_metadata() {
                // A user file where the template has a directory: keep the
                // user's entry and skip the whole subtree.
                if file_type.is_dir() && !existing.is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            if file_type.is_dir() {
                fs::create_dir(&dest)?;
                let metadata = entry.metadata().map_err(std::io::Error::from)?;
                fs::set_permissions(&dest, metadata.permissions())?;
            } else if file_type.is_symlink() {
                symlink(fs::read_link(entry.path())?, &dest)?;
            } else if file_type.is_file() {
                copy_preserving(entry.path(), &dest)?;
            } else {
                debug!("Skipping special file {}", entry.path().display());
                continue;
            }
            debug!("Copied {} -> {}", entry.path().display(), dest.display());
            copied += 1;
        }

        Ok(copied)
    }

    fn owner(&self, path: &Path) -> Result<Identity> {
        let metadata = fs::metadata(path)?;
        Ok(Identity::new(metadata.uid(), metadata.gid()))
    }

    fn chown_recursive(
        &self,
        root: &Path,
        identity: Identity,
        exclude: &[&Path],
    ) -> Result<usize> {
        let mut changed = 0;
        let mut failed = 0;
        let mut first_error = None;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !exclude.iter().any(|skip| entry.path().starts_with(skip)));

        for entry in walker {
            let result = entry.map_err(std::io::Error::from).and_then(|entry| {
                let metadata = entry.path().symlink_metadata()?;
                if metadata.uid() == identity.uid && metadata.gid() == identity.gid {
                    return Ok(false);
                }
                lchown(entry.path(), Some(identity.uid), Some(identity.gid))?;
                Ok(true)
            });
            match result {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(changed),
            Some(e) => Err(BootstrapError::Ownership(format!(
                "{} entries under {} could not be re-owned to {} ({} changed), first error: {}",
                failed,
                root.display(),
                identity,
                changed,
                e
            ))),
        }
    }
}

fn copy_preserving(from: &Path, to: &Path) -> Result<()> {
    // fs::copy carries the permission bits over
    fs::copy(from, to)?;
    let metadata = fs::metadata(from)?;
    filetime::set_file_mtime(to, filetime::FileTime::from_last_modification_time(&metadata))?;
    Ok(())
}
