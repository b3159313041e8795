use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use nix::unistd::{Group, User};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A numeric (UID, GID) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Access to the user and group tables.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Current UID and primary GID of `user`
    async fn resolve(&self, user: &str) -> Result<Identity>;

    /// Current GID of `group`
    async fn group_gid(&self, group: &str) -> Result<u32>;

    async fn set_uid(&self, user: &str, uid: u32) -> Result<()>;

    async fn set_gid(&self, group: &str, gid: u32) -> Result<()>;

    /// Point the primary group of `user` at `gid`
    async fn set_primary_group(&self, user: &str, gid: u32) -> Result<()>;
}

/// Reads passwd/group through libc and edits them with shadow-utils.
pub struct SystemIdentityStore;

impl SystemIdentityStore {
    pub fn new() -> Self {
        Self
    }

    /// Run a shadow-utils tool, surfacing its stderr on failure
    async fn shadow_utils(&self, tool: &str, args: &[String]) -> Result<()> {
        let path = which::which(tool).map_err(|e| {
            BootstrapError::ExecutionFailed(format!("{} not available: {}", tool, e))
        })?;
        let mut cmd = Command::new(path);
        cmd.args(args);
        run_tool(&mut cmd).await
    }
}

impl Default for SystemIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for SystemIdentityStore {
    async fn resolve(&self, user: &str) -> Result<Identity> {
        let passwd = User::from_name(user)
            .map_err(|e| BootstrapError::UnknownIdentity(format!("{}: {}", user, e)))?
            .ok_or_else(|| BootstrapError::UnknownIdentity(format!("no such user '{}'", user)))?;
        Ok(Identity::new(passwd.uid.as_raw(), passwd.gid.as_raw()))
    }

    async fn group_gid(&self, group: &str) -> Result<u32> {
        let entry = Group::from_name(group)
            .map_err(|e| BootstrapError::UnknownIdentity(format!("{}: {}", group, e)))?
            .ok_or_else(|| {
                BootstrapError::UnknownIdentity(format!("no such group '{}'", group))
            })?;
        Ok(entry.gid.as_raw())
    }

    async fn set_uid(&self, user: &str, uid: u32) -> Result<()> {
        self.shadow_utils("usermod", &["-u".to_string(), uid.to_string(), user.to_string()])
            .await
    }

    async fn set_gid(&self, group: &str, gid: u32) -> Result<()> {
        self.shadow_utils("groupmod", &["-g".to_string(), gid.to_string(), group.to_string()])
            .await
    }

    async fn set_primary_group(&self, user: &str, gid: u32) -> Result<()> {
        self.shadow_utils("usermod", &["-g".to_string(), gid.to_string(), user.to_string()])
            .await
    }
}

async fn run_tool(cmd: &mut Command) -> Result<()> {
    debug!("Running {:?}", cmd);
    let output = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| BootstrapError::ExecutionFailed(format!("{:?}: {}", cmd, e)))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(BootstrapError::ExecutionFailed(format!(
            "{:?} exited with {}: {}",
            cmd,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
