use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// The process that takes over once the bootstrap is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub program: String,
    pub args: Vec<String>,
}

impl Workload {
    /// Resolve the container command. No command runs the default alias, a
    /// single word naming an alias runs that alias, anything else is taken
    /// verbatim.
    pub fn resolve(argv: &[String], config: &BootstrapConfig) -> Result<Self> {
        let argv = match argv {
            [] => alias(config, &config.default_workload)?,
            [name] if config.workloads.contains_key(name) => alias(config, name)?,
            _ => argv,
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BootstrapError::Config("empty workload command".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Replace the current process with the workload. Only returns on
    /// failure.
    pub fn exec(&self) -> BootstrapError {
        let err = Command::new(&self.program).args(&self.args).exec();
        BootstrapError::ExecutionFailed(format!("Failed to exec {}: {}", self, err))
    }
}

fn alias<'a>(config: &'a BootstrapConfig, name: &str) -> Result<&'a [String]> {
    config
        .workloads
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| BootstrapError::Config(format!("workload '{}' is not defined", name)))
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
