use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "toadbox-init")]
#[command(
    about = "Container entrypoint for agent sandboxes - prepares the home directory and user identity, then execs the workload",
    long_about = None
)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Load configuration from a JSON file
    #[arg(short, long, env = "TOADBOX_INIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target UID for the sandbox user (overrides PUID)
    #[arg(long, value_name = "UID")]
    pub uid: Option<u32>,

    /// Target GID for the sandbox group (overrides PGID)
    #[arg(long, value_name = "GID")]
    pub gid: Option<u32>,

    /// Recursively re-own the mounted workspace when its owner is wrong
    #[arg(long)]
    pub fix_workspace_ownership: bool,

    /// Write a JSON report of the bootstrap pass to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Run the bootstrap and exit instead of starting the workload
    #[arg(long)]
    pub no_exec: bool,

    /// Workload to run: idle, sshd, desktop, or any command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}
