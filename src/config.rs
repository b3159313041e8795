use crate::error::{BootstrapError, Result};
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Target UID for the managed user
pub const ENV_PUID: &str = "PUID";

/// Target GID for the managed group
pub const ENV_PGID: &str = "PGID";

/// Opt-in switch for re-owning the mounted workspace
pub const ENV_FIX_WORKSPACE_OWNERSHIP: &str = "FIX_WORKSPACE_OWNERSHIP";

/// Fixed layout of the sandbox image. Every field can be overridden from a
/// JSON file; missing fields keep the image defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Name of the managed user
    pub user: String,

    /// Name of the managed user's primary group
    pub group: String,

    /// Live home directory (often a named volume)
    pub home_dir: PathBuf,

    /// Build-time skeleton copied into an empty home directory
    pub skel_dir: PathBuf,

    /// Marker file name, relative to the home directory
    pub marker_file: String,

    /// Shell profile whose presence means "home already initialized"
    pub profile_file: String,

    /// Login profile synthesized when missing
    pub login_profile_file: String,

    /// Desktop session script copied from the skeleton when missing
    pub session_file: String,

    /// Package-manager install prefix, never re-owned at runtime
    pub package_prefix: PathBuf,

    /// Externally mounted workspace, re-owned only on request
    pub workspace_dir: PathBuf,

    /// Workload alias used when no command is given
    pub default_workload: String,

    /// Named workloads (alias -> argv)
    pub workloads: BTreeMap<String, Vec<String>>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let mut workloads = BTreeMap::new();
        workloads.insert(
            "idle".to_string(),
            vec!["sleep".to_string(), "infinity".to_string()],
        );
        workloads.insert(
            "sshd".to_string(),
            vec![
                "/usr/sbin/sshd".to_string(),
                "-D".to_string(),
                "-e".to_string(),
            ],
        );
        workloads.insert(
            "desktop".to_string(),
            vec!["/usr/local/bin/start-desktop".to_string()],
        );

        Self {
            user: String::from("user"),
            group: String::from("user"),
            home_dir: PathBuf::from("/home/user"),
            skel_dir: PathBuf::from("/etc/skel"),
            marker_file: String::from(".toadbox-init"),
            profile_file: String::from(".bashrc"),
            login_profile_file: String::from(".profile"),
            session_file: String::from(".vnc/xstartup"),
            package_prefix: PathBuf::from("/home/linuxbrew/.linuxbrew"),
            workspace_dir: PathBuf::from("/workspace"),
            default_workload: String::from("idle"),
            workloads,
        }
    }
}

impl BootstrapConfig {
    /// Load a configuration file, filling unset fields with defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BootstrapError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            BootstrapError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() || self.group.is_empty() {
            return Err(BootstrapError::Config(
                "user and group must not be empty".to_string(),
            ));
        }
        for (field, path) in [
            ("home_dir", &self.home_dir),
            ("skel_dir", &self.skel_dir),
            ("package_prefix", &self.package_prefix),
            ("workspace_dir", &self.workspace_dir),
        ] {
            if !path.is_absolute() {
                return Err(BootstrapError::Config(format!(
                    "{} must be an absolute path, got {}",
                    field,
                    path.display()
                )));
            }
        }
        for (field, name) in [
            ("marker_file", &self.marker_file),
            ("profile_file", &self.profile_file),
            ("login_profile_file", &self.login_profile_file),
            ("session_file", &self.session_file),
        ] {
            if !is_home_relative(name) {
                return Err(BootstrapError::Config(format!(
                    "{} must be a relative path inside the home directory, got '{}'",
                    field, name
                )));
            }
        }
        if let Some((alias, _)) = self.workloads.iter().find(|(_, argv)| argv.is_empty()) {
            return Err(BootstrapError::Config(format!(
                "workload '{}' has an empty command",
                alias
            )));
        }
        if !self.workloads.contains_key(&self.default_workload) {
            return Err(BootstrapError::Config(format!(
                "default workload '{}' is not defined",
                self.default_workload
            )));
        }
        Ok(())
    }

    pub fn marker_path(&self) -> PathBuf {
        self.home_dir.join(&self.marker_file)
    }

    /// Advisory lock file serializing bootstraps of the same home directory
    pub fn lock_path(&self) -> PathBuf {
        self.home_dir.join(format!("{}.lock", self.marker_file))
    }

    pub fn profile_path(&self) -> PathBuf {
        self.home_dir.join(&self.profile_file)
    }

    pub fn login_profile_path(&self) -> PathBuf {
        self.home_dir.join(&self.login_profile_file)
    }
}

fn is_home_relative(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Per-start inputs supplied by the container runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapInputs {
    pub target_uid: Option<u32>,
    pub target_gid: Option<u32>,
    pub fix_workspace_ownership: bool,
}

impl BootstrapInputs {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var_os(key).map(env_text))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            target_uid: parse_id(ENV_PUID, lookup(ENV_PUID))?,
            target_gid: parse_id(ENV_PGID, lookup(ENV_PGID))?,
            fix_workspace_ownership: match lookup(ENV_FIX_WORKSPACE_OWNERSHIP) {
                Some(value) => parse_flag(ENV_FIX_WORKSPACE_OWNERSHIP, &value)?,
                None => false,
            },
        })
    }

    /// Apply command-line overrides on top of the environment
    pub fn with_overrides(
        mut self,
        uid: Option<u32>,
        gid: Option<u32>,
        fix_workspace: bool,
    ) -> Self {
        if uid.is_some() {
            self.target_uid = uid;
        }
        if gid.is_some() {
            self.target_gid = gid;
        }
        self.fix_workspace_ownership |= fix_workspace;
        self
    }

    /// The requested identity, when both halves were supplied
    pub fn target_identity(&self) -> Option<Identity> {
        match (self.target_uid, self.target_gid) {
            (Some(uid), Some(gid)) => Some(Identity::new(uid, gid)),
            _ => None,
        }
    }
}

/// Non-UTF-8 bytes become U+FFFD, so such a value fails parsing instead of
/// reading as unset.
fn env_text(value: OsString) -> String {
    value.to_string_lossy().into_owned()
}

fn parse_id(name: &str, value: Option<String>) -> Result<Option<u32>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse::<u32>().map(Some).map_err(|_| {
        BootstrapError::Config(format!("{} must be a numeric id, got '{}'", name, value))
    })
}

pub fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BootstrapError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BootstrapConfig::default();
        config.validate().unwrap();
        assert_eq!(config.marker_path(), PathBuf::from("/home/user/.toadbox-init"));
        assert_eq!(config.lock_path(), PathBuf::from("/home/user/.toadbox-init.lock"));
        assert_eq!(config.profile_path(), PathBuf::from("/home/user/.bashrc"));
    }

    #[test]
    fn test_inputs_from_env() {
        let inputs = BootstrapInputs::from_lookup(lookup(&[
            ("PUID", "1000"),
            ("PGID", " 1001 "),
            ("FIX_WORKSPACE_OWNERSHIP", "True"),
        ]))
        .unwrap();

        assert_eq!(inputs.target_identity(), Some(Identity::new(1000, 1001)));
        assert!(inputs.fix_workspace_ownership);
    }

    #[test]
    fn test_inputs_absent_and_partial() {
        let inputs = BootstrapInputs::from_lookup(lookup(&[])).unwrap();
        assert_eq!(inputs, BootstrapInputs::default());

        let inputs = BootstrapInputs::from_lookup(lookup(&[("PUID", "1000"), ("PGID", "")]))
            .unwrap();
        assert_eq!(inputs.target_uid, Some(1000));
        assert_eq!(inputs.target_identity(), None);
    }

    #[test]
    fn test_inputs_reject_garbage() {
        let err = BootstrapInputs::from_lookup(lookup(&[("PUID", "abc")])).unwrap_err();
        assert!(err.to_string().contains("PUID"));

        let err = BootstrapInputs::from_lookup(lookup(&[("FIX_WORKSPACE_OWNERSHIP", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("FIX_WORKSPACE_OWNERSHIP"));
    }

    #[test]
    fn test_inputs_reject_non_utf8() {
        use std::os::unix::ffi::OsStringExt;

        let raw = env_text(OsString::from_vec(vec![b'1', 0xff]));
        let err = BootstrapInputs::from_lookup(|key: &str| {
            (key == ENV_PGID).then(|| raw.clone())
        })
        .unwrap_err();
        assert!(err.to_string().contains("PGID"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let inputs = BootstrapInputs {
            target_uid: Some(1000),
            target_gid: Some(1000),
            fix_workspace_ownership: false,
        }
        .with_overrides(Some(2000), None, true);

        assert_eq!(inputs.target_identity(), Some(Identity::new(2000, 1000)));
        assert!(inputs.fix_workspace_ownership);
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("init.json");
        std::fs::write(&path, r#"{ "user": "agent", "home_dir": "/home/agent" }"#).unwrap();

        let config = BootstrapConfig::load(&path).unwrap();
        assert_eq!(config.user, "agent");
        assert_eq!(config.home_dir, PathBuf::from("/home/agent"));
        assert_eq!(config.skel_dir, PathBuf::from("/etc/skel"));
    }

    #[test]
    fn test_load_rejects_unknown_fields_and_bad_paths() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("init.json");

        std::fs::write(&path, r#"{ "usr": "agent" }"#).unwrap();
        assert!(BootstrapConfig::load(&path).is_err());

        std::fs::write(&path, r#"{ "marker_file": "../escape" }"#).unwrap();
        assert!(BootstrapConfig::load(&path).is_err());

        std::fs::write(&path, r#"{ "home_dir": "relative/home" }"#).unwrap();
        assert!(BootstrapConfig::load(&path).is_err());

        std::fs::write(&path, r#"{ "default_workload": "missing" }"#).unwrap();
        assert!(BootstrapConfig::load(&path).is_err());
    }
}
