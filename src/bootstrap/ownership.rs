use crate::config::{BootstrapConfig, ENV_FIX_WORKSPACE_OWNERSHIP};
use crate::error::Result;
use crate::fs::Filesystem;
use crate::identity::{Identity, IdentityStore};
use crate::report::{Step, StepLog, StepOutcome};
use std::path::Path;
use tracing::info;

/// How much work the reconciler is allowed to do this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipPlan {
    /// Marker matched and nothing was written to the home directory
    pub fast_path: bool,
    /// Re-own the home directory without the top-entry check
    pub force_home: bool,
    pub fix_workspace: bool,
}

/// Re-own managed paths to the user's current identity.
///
/// The package prefix is never re-owned, and is pruned from any other walk
/// that would reach it.
pub async fn reconcile(
    fs: &dyn Filesystem,
    store: &dyn IdentityStore,
    config: &BootstrapConfig,
    plan: OwnershipPlan,
) -> Result<StepOutcome> {
    if plan.fast_path {
        info!("Identity unchanged since last start, keeping existing ownership");
        return Ok(StepOutcome::skipped(
            "marker matches, ownership from previous start kept",
        ));
    }

    let identity = store.resolve(&config.user).await?;
    let mut log = StepLog::new(Step::Ownership);

    reown(fs, config, &config.home_dir, identity, plan.force_home, &mut log);

    info!(
        "Leaving package prefix {} as built",
        config.package_prefix.display()
    );

    let workspace = &config.workspace_dir;
    if !plan.fix_workspace {
        info!(
            "Not touching {} ownership ({} not enabled)",
            workspace.display(),
            ENV_FIX_WORKSPACE_OWNERSHIP
        );
    } else if !fs.exists(workspace) {
        info!("Workspace {} not mounted, nothing to re-own", workspace.display());
    } else {
        reown(fs, config, workspace, identity, false, &mut log);
    }

    Ok(log.finish("ownership already correct"))
}

fn reown(
    fs: &dyn Filesystem,
    config: &BootstrapConfig,
    path: &Path,
    identity: Identity,
    force: bool,
    log: &mut StepLog,
) {
    let prefix = config.package_prefix.as_path();
    if path.starts_with(prefix) {
        log.failure(format!(
            "refusing to re-own {}, it lies inside the package prefix {}",
            path.display(),
            prefix.display()
        ));
        return;
    }

    if force {
        info!("Re-owning {} unconditionally", path.display());
    } else {
        match fs.owner(path) {
            Ok(owner) if owner == identity => {
                info!("{} already owned by {}", path.display(), identity);
                return;
            }
            Ok(owner) => info!(
                "{} owned by {}, expected {}",
                path.display(),
                owner,
                identity
            ),
            Err(e) => {
                log.failure(format!("could not stat {}: {}", path.display(), e));
                return;
            }
        }
    }

    match fs.chown_recursive(path, identity, &[prefix]) {
        Ok(0) => info!("{} already owned by {}", path.display(), identity),
        Ok(changed) => log.action(format!(
            "re-owned {} entries under {} to {}",
            changed,
            path.display(),
            identity
        )),
        Err(e) => log.failure(e.to_string()),
    }
}
