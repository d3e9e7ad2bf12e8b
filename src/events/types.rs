//! Event kinds and payloads delivered by the transition bus.
//!
//! This module defines:
//! - `EventKind`: the three lifecycle points observers can subscribe to
//! - `SubscriptionId`: the handle returned by `EventBus::on`
//! - `TransitionEvent`: the payload handed to every handler

use crate::transition::{Outcome, Transition, TransitionId};
use serde::{Deserialize, Serialize};

/// Share of the indicator that upload progress may fill.
///
/// Upload can reach 100% while the server is still processing, so observers
/// keep the last tenth for the `finish` event.
pub const UPLOAD_PROGRESS_CAP: f64 = 0.9;

/// Lifecycle points a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new transition began
    Start,
    /// Request payload upload advanced
    Progress,
    /// The transition reached its terminal outcome
    Finish,
}

impl EventKind {
    /// Returns all event kinds.
    pub fn all() -> &'static [EventKind] {
        &[EventKind::Start, EventKind::Progress, EventKind::Finish]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Progress => "progress",
            EventKind::Finish => "finish",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(EventKind::Start),
            "progress" => Ok(EventKind::Progress),
            "finish" => Ok(EventKind::Finish),
            _ => anyhow::bail!(
                "Invalid event kind '{}'. Valid values: start, progress, finish",
                s
            ),
        }
    }
}

/// Handle identifying one registration on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub(crate) u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Transition details as seen by a handler.
///
/// On a `finish` event exactly one of the three flags is true. On `start`
/// and `progress` all three are false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSnapshot {
    pub id: TransitionId,
    pub completed: bool,
    pub interrupted: bool,
    pub cancelled: bool,
}

impl TransitionSnapshot {
    /// Snapshot of a transition that has not finished.
    pub fn in_flight(id: TransitionId) -> Self {
        Self {
            id,
            completed: false,
            interrupted: false,
            cancelled: false,
        }
    }

    /// Snapshot of a transition that just finished with `outcome`.
    pub fn finished(id: TransitionId, outcome: Outcome) -> Self {
        Self {
            id,
            completed: outcome == Outcome::Completed,
            interrupted: outcome == Outcome::Interrupted,
            cancelled: outcome == Outcome::Cancelled,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        if self.completed {
            Some(Outcome::Completed)
        } else if self.interrupted {
            Some(Outcome::Interrupted)
        } else if self.cancelled {
            Some(Outcome::Cancelled)
        } else {
            None
        }
    }
}

/// Upload progress attached to a `progress` event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Upload completion in [0, 100]
    pub percentage: f64,
}

impl Progress {
    /// Indicator fraction for this upload percentage, scaled into `[0, cap]`.
    /// Observers normally pass [`UPLOAD_PROGRESS_CAP`].
    pub fn capped_fraction(&self, cap: f64) -> f64 {
        (self.percentage / 100.0).clamp(0.0, 1.0) * cap
    }
}

/// Payload delivered to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub kind: EventKind,
    pub transition: TransitionSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl TransitionEvent {
    pub fn start(transition: &Transition) -> Self {
        Self {
            kind: EventKind::Start,
            transition: TransitionSnapshot::in_flight(transition.id),
            progress: None,
        }
    }

    pub fn progress(transition: &Transition, percentage: f64) -> Self {
        Self {
            kind: EventKind::Progress,
            transition: TransitionSnapshot::in_flight(transition.id),
            progress: Some(Progress { percentage }),
        }
    }

    pub fn finish(id: TransitionId, outcome: Outcome) -> Self {
        Self {
            kind: EventKind::Finish,
            transition: TransitionSnapshot::finished(id, outcome),
            progress: None,
        }
    }

    pub fn id(&self) -> TransitionId {
        self.transition.id
    }

    /// The terminal outcome, present only on `finish` events.
    pub fn outcome(&self) -> Option<Outcome> {
        self.transition.outcome()
    }

    /// Upload percentage, present only on `progress` events.
    pub fn percentage(&self) -> Option<f64> {
        self.progress.map(|p| p.percentage)
    }
}
