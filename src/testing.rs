//! In-memory stand-ins for the filesystem and the user/group tables.

use crate::error::{BootstrapError, Result};
use crate::fs::Filesystem;
use crate::identity::{Identity, IdentityStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Owner of everything the bootstrap itself creates.
const PROCESS_OWNER: Identity = Identity { uid: 0, gid: 0 };

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub node: Node,
    pub owner: Identity,
}

#[derive(Default)]
struct MemoryFsState {
    entries: BTreeMap<PathBuf, Entry>,
    chown_calls: Vec<PathBuf>,
    failing_writes: HashSet<PathBuf>,
    failing_chowns: HashSet<PathBuf>,
}

#[derive(Default)]
pub struct MemoryFs {
    state: Mutex<MemoryFsState>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(&self, path: impl AsRef<Path>, owner: Identity) {
        let mut state = self.state.lock().unwrap();
        insert_with_parents(&mut state.entries, path.as_ref(), Node::Dir, owner);
    }

    pub fn file(&self, path: impl AsRef<Path>, contents: &str, owner: Identity) {
        let mut state = self.state.lock().unwrap();
        insert_with_parents(
            &mut state.entries,
            path.as_ref(),
            Node::File(contents.to_string()),
            owner,
        );
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.state.lock().unwrap().entries.get(path.as_ref()) {
            Some(Entry {
                node: Node::File(contents),
                ..
            }) => Some(contents.clone()),
            _ => None,
        }
    }

    pub fn owner_of(&self, path: impl AsRef<Path>) -> Option<Identity> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(path.as_ref())
            .map(|entry| entry.owner)
    }

    /// Roots passed to `chown_recursive`, in call order
    pub fn chown_calls(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().chown_calls.clone()
    }

    pub fn snapshot(&self) -> BTreeMap<PathBuf, Entry> {
        self.state.lock().unwrap().entries.clone()
    }

    pub fn fail_writes_to(&self, path: impl AsRef<Path>) {
        let mut state = self.state.lock().unwrap();
        state.failing_writes.insert(path.as_ref().to_path_buf());
    }

    pub fn fail_chown(&self, path: impl AsRef<Path>) {
        let mut state = self.state.lock().unwrap();
        state.failing_chowns.insert(path.as_ref().to_path_buf());
    }
}

fn insert_with_parents(
    entries: &mut BTreeMap<PathBuf, Entry>,
    path: &Path,
    node: Node,
    owner: Identity,
) {
    for ancestor in path.ancestors().skip(1) {
        if ancestor == Path::new("/") || ancestor.as_os_str().is_empty() {
            break;
        }
        entries.entry(ancestor.to_path_buf()).or_insert(Entry {
            node: Node::Dir,
            owner,
        });
    }
    entries.insert(path.to_path_buf(), Entry { node, owner });
}

fn not_found(path: &Path) -> BootstrapError {
    BootstrapError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    ))
}

impl Filesystem for MemoryFs {
    fn exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().entries.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(
            self.state.lock().unwrap().entries.get(path),
            Some(Entry {
                node: Node::Dir,
                ..
            })
        )
    }

    fn is_empty_dir(&self, path: &Path) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if !state.entries.contains_key(path) {
            return Err(not_found(path));
        }
        Ok(!state.entries.keys().any(|key| key.parent() == Some(path)))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.contents(path).ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_writes.contains(path) {
            return Err(BootstrapError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is read-only", path.display()),
            )));
        }
        let owner = state
            .entries
            .get(path)
            .map(|entry| entry.owner)
            .unwrap_or(PROCESS_OWNER);
        insert_with_parents(
            &mut state.entries,
            path,
            Node::File(contents.to_string()),
            owner,
        );
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        let contents = self.read_to_string(from)?;
        self.write(to, &contents)
    }

    fn copy_tree_missing(&self, from: &Path, to: &Path) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let sources: Vec<(PathBuf, Node)> = state
            .entries
            .iter()
            .filter(|(path, _)| path.starts_with(from) && path.as_path() != from)
            .map(|(path, entry)| (path.clone(), entry.node.clone()))
            .collect();

        let mut copied = 0;
        for (path, node) in sources {
            let Ok(relative) = path.strip_prefix(from) else {
                continue;
            };
            let dest = to.join(relative);
            let blocked = dest
                .ancestors()
                .skip(1)
                .take_while(|ancestor| *ancestor != to)
                .any(|ancestor| {
                    matches!(
                        state.entries.get(ancestor),
                        Some(Entry {
                            node: Node::File(_),
                            ..
                        })
                    )
                });
            if blocked || state.entries.contains_key(&dest) {
                continue;
            }
            state.entries.insert(
                dest,
                Entry {
                    node,
                    owner: PROCESS_OWNER,
                },
            );
            copied += 1;
        }
        Ok(copied)
    }

    fn owner(&self, path: &Path) -> Result<Identity> {
        self.owner_of(path).ok_or_else(|| not_found(path))
    }

    fn chown_recursive(
        &self,
        root: &Path,
        identity: Identity,
        exclude: &[&Path],
    ) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.chown_calls.push(root.to_path_buf());
        if state.failing_chowns.contains(root) {
            return Err(BootstrapError::Ownership(format!(
                "operation not permitted on {}",
                root.display()
            )));
        }

        let mut changed = 0;
        for (path, entry) in state.entries.iter_mut() {
            if !path.starts_with(root) || exclude.iter().any(|skip| path.starts_with(skip)) {
                continue;
            }
            if entry.owner != identity {
                entry.owner = identity;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

struct FakeIdentityState {
    user: Identity,
    group_gid: u32,
    calls: Vec<String>,
    failing: HashSet<String>,
}

/// A single user and its primary group.
pub struct FakeIdentityStore {
    state: Mutex<FakeIdentityState>,
}

impl FakeIdentityStore {
    pub fn new(user: Identity) -> Self {
        Self {
            state: Mutex::new(FakeIdentityState {
                user,
                group_gid: user.gid,
                calls: Vec::new(),
                failing: HashSet::new(),
            }),
        }
    }

    /// Make the named operation fail from now on
    pub fn fail(&self, operation: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(operation.to_string());
    }

    /// Mutating calls issued so far
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn current(&self) -> Identity {
        self.state.lock().unwrap().user
    }

    fn record(
        &self,
        operation: &str,
        name: &str,
        id: u32,
    ) -> Result<MutexGuard<'_, FakeIdentityState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {} {}", operation, name, id));
        if state.failing.contains(operation) {
            return Err(BootstrapError::ExecutionFailed(format!(
                "{} {} {} failed",
                operation, name, id
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl IdentityStore for FakeIdentityStore {
    async fn resolve(&self, user: &str) -> Result<Identity> {
        let state = self.state.lock().unwrap();
        if state.failing.contains("resolve") {
            return Err(BootstrapError::UnknownIdentity(format!(
                "no such user '{}'",
                user
            )));
        }
        Ok(state.user)
    }

    async fn group_gid(&self, _group: &str) -> Result<u32> {
        Ok(self.state.lock().unwrap().group_gid)
    }

    async fn set_uid(&self, user: &str, uid: u32) -> Result<()> {
        let mut state = self.record("set_uid", user, uid)?;
        state.user.uid = uid;
        Ok(())
    }

    async fn set_gid(&self, group: &str, gid: u32) -> Result<()> {
        let mut state = self.record("set_gid", group, gid)?;
        state.group_gid = gid;
        Ok(())
    }

    async fn set_primary_group(&self, user: &str, gid: u32) -> Result<()> {
        let mut state = self.record("set_primary_group", user, gid)?;
        state.user.gid = gid;
        Ok(())
    }
}
