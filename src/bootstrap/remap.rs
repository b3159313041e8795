use crate::config::{BootstrapConfig, BootstrapInputs, ENV_PGID, ENV_PUID};
use crate::identity::IdentityStore;
use crate::report::{Step, StepLog, StepOutcome};
use tracing::{debug, info, warn};

/// Move the managed user and group to the requested UID/GID.
///
/// Order is UID, then group GID, then the user's primary group. Each change
/// is best-effort and skipped when the value already matches.
pub async fn remap(
    store: &dyn IdentityStore,
    config: &BootstrapConfig,
    inputs: &BootstrapInputs,
) -> StepOutcome {
    let (uid, gid) = match (inputs.target_uid, inputs.target_gid) {
        (Some(uid), Some(gid)) => (uid, gid),
        (None, None) => {
            info!("{} and {} not set, keeping image identity", ENV_PUID, ENV_PGID);
            return StepOutcome::skipped("no target identity requested");
        }
        _ => {
            warn!(
                "Only one of {} and {} is set, both are required; keeping image identity",
                ENV_PUID, ENV_PGID
            );
            return StepOutcome::skipped("incomplete target identity");
        }
    };

    let mut log = StepLog::new(Step::IdentityRemap);

    match store.resolve(&config.user).await {
        Ok(current) if current.uid == uid => {
            debug!("User {} already has uid {}", config.user, uid)
        }
        Ok(current) => match store.set_uid(&config.user, uid).await {
            Ok(()) => log.action(format!(
                "changed uid of {} from {} to {}",
                config.user, current.uid, uid
            )),
            Err(e) => log.failure(format!("could not set uid of {} to {}: {}", config.user, uid, e)),
        },
        Err(e) => log.failure(format!("could not look up user {}: {}", config.user, e)),
    }

    match store.group_gid(&config.group).await {
        Ok(current) if current == gid => {
            debug!("Group {} already has gid {}", config.group, gid)
        }
        current => {
            if let Err(e) = &current {
                debug!("Could not look up group {}: {}", config.group, e);
            }
            match store.set_gid(&config.group, gid).await {
                Ok(()) => log.action(format!("changed gid of group {} to {}", config.group, gid)),
                Err(e) => log.failure(format!(
                    "could not set gid of group {} to {}: {}",
                    config.group, gid, e
                )),
            }
        }
    }

    match store.resolve(&config.user).await {
        Ok(current) if current.gid == gid => {
            debug!("User {} already has primary gid {}", config.user, gid)
        }
        _ => match store.set_primary_group(&config.user, gid).await {
            Ok(()) => log.action(format!("set primary group of {} to {}", config.user, gid)),
            Err(e) => log.failure(format!(
                "could not set primary group of {} to {}: {}",
                config.user, gid, e
            )),
        },
    }

    log.finish("identity already matches target")
}
