//! Update gate: decides whether a component is triggered, awaited or skipped.

use std::cmp::Ordering;
use std::fmt;

/// Coarse lifecycle of a node group or add-on as seen by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Idle and healthy; an update may be started.
    Active,
    /// An update (or creation) is already running remotely.
    Updating,
    /// Degraded, failed or being deleted; must not be touched.
    Unavailable,
}

/// What to do with one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Start an update to the target version, then wait for it.
    Trigger,
    /// Someone else's update is running; wait for it without re-triggering.
    Await,
    /// Target is older than or equal to the current version.
    SkipCurrent,
    /// Component is in a state that cannot be updated.
    SkipUnavailable,
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trigger => "trigger",
            Self::Await => "await",
            Self::SkipCurrent => "skip-current",
            Self::SkipUnavailable => "skip-unavailable",
        };
        f.write_str(s)
    }
}

/// Decide the action for a component.
///
/// `relation` is the ordering of the target version relative to the current
/// version (`Greater` means the target is newer).
pub const fn decide(lifecycle: Lifecycle, relation: Ordering) -> GateDecision {
    match (lifecycle, relation) {
        (Lifecycle::Updating, _) => GateDecision::Await,
        (Lifecycle::Active, Ordering::Greater) => GateDecision::Trigger,
        (Lifecycle::Active, Ordering::Less | Ordering::Equal) => GateDecision::SkipCurrent,
        (Lifecycle::Unavailable, _) => GateDecision::SkipUnavailable,
    }
}
