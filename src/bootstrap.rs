//! The container bootstrap sequence.
//!
//! One pass runs four steps in a fixed order:
//!
//! 1. [`home::initialize`] fills gaps in the home directory from the skeleton
//! 2. [`remap::remap`] moves the user and group to `PUID`/`PGID`
//! 3. [`ownership::reconcile`] re-owns managed paths where needed
//! 4. [`record::write_marker`] persists the resolved identity
//!
//! The marker written by step 4 lets the next start skip steps 1 and 3 when
//! the requested identity has not changed. A fatal error in any step aborts
//! the pass before the marker is written.

mod home;
mod ownership;
mod record;
mod remap;

use crate::config::{BootstrapConfig, BootstrapInputs};
use crate::error::Result;
use crate::fs::Filesystem;
use crate::identity::IdentityStore;
use crate::marker::{is_fast_path, MarkerStore};
use crate::report::{BootstrapReport, Step};
use ownership::OwnershipPlan;
use tracing::info;

pub struct Bootstrap<'a> {
    config: &'a BootstrapConfig,
    fs: &'a dyn Filesystem,
    identities: &'a dyn IdentityStore,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        config: &'a BootstrapConfig,
        fs: &'a dyn Filesystem,
        identities: &'a dyn IdentityStore,
    ) -> Self {
        Self {
            config,
            fs,
            identities,
        }
    }

    pub async fn run(&self, inputs: &BootstrapInputs) -> Result<BootstrapReport> {
        let markers = MarkerStore::new(self.fs, self.config.marker_path());
        let stored = markers.load();

        // Without PUID/PGID the identity to establish is the one the image
        // was built with.
        let current = self.identities.resolve(&self.config.user).await?;
        let requested = inputs.target_identity().unwrap_or(current);
        let fast_path = is_fast_path(stored.as_ref(), requested);

        match stored {
            Some(record) if fast_path => info!(
                "Marker records {}, matching the requested identity",
                record.identity
            ),
            Some(record) => info!(
                "Marker records {} but {} is requested, running full bootstrap",
                record.identity, requested
            ),
            None => info!(
                "No marker at {}, running full bootstrap for {}",
                markers.path().display(),
                requested
            ),
        }

        let mut report = BootstrapReport::new(requested, fast_path);

        let home_outcome = home::initialize(self.fs, self.config, fast_path)?;
        let home_written = home_outcome.changed();
        report.push(Step::HomeDirectory, home_outcome);

        report.push(
            Step::IdentityRemap,
            remap::remap(self.identities, self.config, inputs).await,
        );

        // Files the initializer just created belong to the bootstrap process,
        // so a write to the home directory cancels the fast path here.
        let plan = OwnershipPlan {
            fast_path: fast_path && !home_written,
            force_home: stored.is_none() || home_written,
            fix_workspace: inputs.fix_workspace_ownership,
        };
        report.push(
            Step::Ownership,
            ownership::reconcile(self.fs, self.identities, self.config, plan).await?,
        );

        let (outcome, record) =
            record::write_marker(&markers, self.identities, &self.config.user, stored).await?;
        report.push(Step::Marker, outcome);
        report.marker = Some(record.identity);

        Ok(report)
    }
}
