use crate::error::Result;
use crate::identity::Identity;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// The four bootstrap steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    HomeDirectory,
    IdentityRemap,
    Ownership,
    Marker,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::HomeDirectory,
        Step::IdentityRemap,
        Step::Ownership,
        Step::Marker,
    ];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::HomeDirectory => "home-directory",
            Step::IdentityRemap => "identity-remap",
            Step::Ownership => "ownership",
            Step::Marker => "marker",
        };
        f.write_str(name)
    }
}

/// Result of a single step. Best-effort failures land in `Degraded` instead
/// of aborting the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    Applied {
        actions: Vec<String>,
    },
    Skipped {
        reason: String,
    },
    Degraded {
        actions: Vec<String>,
        failures: Vec<String>,
    },
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }

    /// Whether the step changed anything on disk or in the identity tables.
    pub fn changed(&self) -> bool {
        match self {
            StepOutcome::Applied { actions } | StepOutcome::Degraded { actions, .. } => {
                !actions.is_empty()
            }
            StepOutcome::Skipped { .. } => false,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StepOutcome::Degraded { .. })
    }

    pub fn failures(&self) -> &[String] {
        match self {
            StepOutcome::Degraded { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Collects actions and tolerated failures while a step runs, logging each
/// one as it happens.
#[derive(Debug)]
pub struct StepLog {
    step: Step,
    actions: Vec<String>,
    failures: Vec<String>,
}

impl StepLog {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            actions: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn action(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", self.step, message);
        self.actions.push(message);
    }

    pub fn failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] {} (continuing)", self.step, message);
        self.failures.push(message);
    }

    /// Close the log. A step that neither acted nor failed is reported as
    /// skipped with `idle_reason`.
    pub fn finish(self, idle_reason: &str) -> StepOutcome {
        if !self.failures.is_empty() {
            StepOutcome::Degraded {
                actions: self.actions,
                failures: self.failures,
            }
        } else if self.actions.is_empty() {
            info!("[{}] {}", self.step, idle_reason);
            StepOutcome::skipped(idle_reason)
        } else {
            StepOutcome::Applied {
                actions: self.actions,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
}

/// Aggregated result of one bootstrap pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Identity the pass was asked to establish
    pub requested: Identity,
    /// Whether the stored marker matched `requested` when the pass started
    pub fast_path: bool,
    /// Identity recorded in the marker at the end of the pass
    pub marker: Option<Identity>,
    pub steps: Vec<StepReport>,
}

impl BootstrapReport {
    pub fn new(requested: Identity, fast_path: bool) -> Self {
        Self {
            requested,
            fast_path,
            marker: None,
            steps: Vec::with_capacity(Step::ALL.len()),
        }
    }

    pub fn push(&mut self, step: Step, outcome: StepOutcome) {
        self.steps.push(StepReport { step, outcome });
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|report| report.step == step)
            .map(|report| &report.outcome)
    }

    pub fn degraded_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|report| report.outcome.is_degraded())
            .map(|report| report.step)
            .collect()
    }

    pub fn log_summary(&self) {
        for report in &self.steps {
            match &report.outcome {
                StepOutcome::Applied { actions } => {
                    info!("{}: applied ({} action(s))", report.step, actions.len())
                }
                StepOutcome::Skipped { reason } => info!("{}: skipped ({})", report.step, reason),
                StepOutcome::Degraded { .. } => warn!(
                    "{}: degraded, {} failure(s): {}",
                    report.step,
                    report.outcome.failures().len(),
                    report.outcome.failures().join("; ")
                ),
            }
        }
        let degraded = self.degraded_steps();
        if !degraded.is_empty() {
            warn!("Bootstrap finished with {} degraded step(s)", degraded.len());
        }
        if let Some(marker) = self.marker {
            info!("Bootstrap complete, marker records {}", marker);
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
