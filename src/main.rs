mod bootstrap;
mod cli;
mod config;
mod error;
mod fs;
mod identity;
mod marker;
mod report;
#[cfg(test)]
mod testing;
mod workload;

use bootstrap::Bootstrap;
use clap::Parser;
use cli::Cli;
use config::{BootstrapConfig, BootstrapInputs};
use fs::HostFilesystem;
use identity::SystemIdentityStore;
use marker::BootstrapLock;
use report::BootstrapReport;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workload::Workload;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "toadbox_init=debug,info"
    } else {
        "toadbox_init=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            BootstrapConfig::load(path)?
        }
        None => BootstrapConfig::default(),
    };
    let inputs = BootstrapInputs::from_env()?.with_overrides(
        cli.uid,
        cli.gid,
        cli.fix_workspace_ownership,
    );
    let workload = Workload::resolve(&cli.command, &config)?;

    let lock = match BootstrapLock::acquire(&config.lock_path()) {
        Ok(lock) => Some(lock),
        Err(e) => {
            warn!(
                "Could not lock {}, continuing without it: {}",
                config.lock_path().display(),
                e
            );
            None
        }
    };

    let host = HostFilesystem::new();
    let identities = SystemIdentityStore::new();
    let report = Bootstrap::new(&config, &host, &identities)
        .run(&inputs)
        .await?;
    report.log_summary();

    if let Some(path) = &cli.report {
        save_report(&report, path);
    }
    drop(lock);

    if cli.no_exec {
        info!("--no-exec given, not starting {}", workload);
        return Ok(());
    }

    info!("Handing off to {}", workload);
    Err(workload.exec())
}

/// The report is diagnostics only; failing to write it never blocks the workload.
fn save_report(report: &BootstrapReport, path: &Path) -> bool {
    match report.write_json(path) {
        Ok(()) => {
            info!("Wrote bootstrap report to {}", path.display());
            true
        }
        Err(e) => {
            warn!("Could not write bootstrap report to {}: {}", path.display(), e);
            false
        }
    }
}
