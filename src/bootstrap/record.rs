use crate::error::Result;
use crate::identity::IdentityStore;
use crate::marker::{MarkerRecord, MarkerStore};
use crate::report::{Step, StepLog, StepOutcome};
use tracing::info;

/// Record the identity the user actually has now, read back from the
/// identity store rather than taken from the requested values.
pub async fn write_marker(
    markers: &MarkerStore<'_>,
    store: &dyn IdentityStore,
    user: &str,
    stored: Option<MarkerRecord>,
) -> Result<(StepOutcome, MarkerRecord)> {
    let resolved = store.resolve(user).await?;
    let record = MarkerRecord::new(resolved);

    if stored == Some(record) {
        info!(
            "Marker {} already records {}",
            markers.path().display(),
            resolved
        );
        return Ok((StepOutcome::skipped("marker already up to date"), record));
    }

    markers.save(&record)?;
    let mut log = StepLog::new(Step::Marker);
    log.action(format!(
        "recorded {} in {}",
        resolved,
        markers.path().display()
    ));
    Ok((log.finish("marker already up to date"), record))
}
