//! Common types for component update outcomes.

use std::fmt;

use tracing::{info, warn};

use crate::error::{ComponentFailure, ComponentKind, JoinedError, UpdaterError};

/// Terminal outcome of one component update.
#[derive(Debug)]
pub enum Outcome {
    /// An update ran and was verified.
    Updated { from: String, to: String },
    /// Already at (or beyond) the recommended version.
    Current { version: String },
    /// Deliberately left alone; not an error.
    Skipped { reason: String },
    /// Dry run: the update that would have been triggered.
    Planned { from: String, to: String },
    Failed(UpdaterError),
}

impl Outcome {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Short label used in log lines.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "updated",
            Self::Current { .. } => "current",
            Self::Skipped { .. } => "skipped",
            Self::Planned { .. } => "planned",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated { from, to } => write!(f, "updated {from} -> {to}"),
            Self::Current { version } => write!(f, "already current at {version}"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Planned { from, to } => write!(f, "would update {from} -> {to}"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

impl From<crate::error::Result<Self>> for Outcome {
    fn from(result: crate::error::Result<Self>) -> Self {
        result.unwrap_or_else(Self::Failed)
    }
}

/// Outcome tagged with the component it belongs to.
#[derive(Debug)]
pub struct ComponentOutcome {
    pub kind: ComponentKind,
    pub name: String,
    pub outcome: Outcome,
}

impl ComponentOutcome {
    pub fn nodegroup(name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            kind: ComponentKind::NodeGroup,
            name: name.into(),
            outcome,
        }
    }

    pub fn addon(name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            kind: ComponentKind::Addon,
            name: name.into(),
            outcome,
        }
    }
}

/// Every component outcome recorded during one run.
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<ComponentOutcome>,
}

impl RunReport {
    pub const fn new() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }

    /// Record an outcome and log it.
    pub fn record(&mut self, outcome: ComponentOutcome) {
        if outcome.outcome.is_failure() {
            warn!(
                component = %outcome.name,
                kind = %outcome.kind,
                result = outcome.outcome.label(),
                "{} {} {}", outcome.kind, outcome.name, outcome.outcome
            );
        } else {
            info!(
                component = %outcome.name,
                kind = %outcome.kind,
                result = outcome.outcome.label(),
                "{} {} {}", outcome.kind, outcome.name, outcome.outcome
            );
        }
        self.outcomes.push(outcome);
    }

    #[cfg(test)]
    pub fn outcomes(&self) -> &[ComponentOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.outcome.is_failure())
    }

    /// Number of outcomes carrying the given label.
    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.label() == label)
            .count()
    }

    /// Outcome recorded for a component, if any.
    #[cfg(test)]
    pub fn get(&self, kind: ComponentKind, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.kind == kind && o.name == name)
            .map(|o| &o.outcome)
    }

    /// Log the final summary line.
    pub fn log_summary(&self, cluster_name: &str) {
        info!(
            cluster = %cluster_name,
            total = self.len(),
            updated = self.count("updated"),
            current = self.count("current"),
            skipped = self.count("skipped"),
            planned = self.count("planned"),
            failed = self.count("failed"),
            "Update run finished"
        );
    }

    /// Split into the successful report or one error joining every failure.
    pub fn into_result(self) -> Result<Self, JoinedError> {
        if !self.has_failures() {
            return Ok(self);
        }

        let failures = self
            .outcomes
            .into_iter()
            .filter_map(|o| match o.outcome {
                Outcome::Failed(error) => Some(ComponentFailure {
                    kind: o.kind,
                    name: o.name,
                    error,
                }),
                _ => None,
            })
            .collect();

        Err(JoinedError::new(failures))
    }
}
