//! Transition identifiers, lifecycle state, and outcomes.
//!
//! A [`Transition`] tracks one page navigation from the moment the driver
//! creates it until it reaches exactly one terminal state:
//!
//! ```text
//! Pending --start--> Started --progress--> InProgress --finish--> Completed
//!                       |                      |                  Interrupted
//!                       +------- finish -------+                  Cancelled
//! ```
//!
//! The bus is the only component that moves a transition between states.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier, unique per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionId(Uuid);

impl TransitionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransitionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form keeps log lines readable
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}

/// Lifecycle state of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionState {
    /// Created by the driver, not yet announced
    Pending,
    /// `start` has been delivered
    Started,
    /// At least one upload progress event has been delivered
    InProgress,
    /// Response fully applied
    Completed,
    /// Superseded by a newer transition
    Interrupted,
    /// Explicitly aborted
    Cancelled,
}

impl TransitionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransitionState::Completed | TransitionState::Interrupted | TransitionState::Cancelled
        )
    }

    /// True once `start` has been delivered and before a terminal state.
    pub fn is_active(&self) -> bool {
        matches!(self, TransitionState::Started | TransitionState::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionState::Pending => "pending",
            TransitionState::Started => "started",
            TransitionState::InProgress => "in_progress",
            TransitionState::Completed => "completed",
            TransitionState::Interrupted => "interrupted",
            TransitionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a transition ended. Carried by every `finish` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Interrupted,
    Cancelled,
}

impl Outcome {
    pub fn all() -> &'static [Outcome] {
        &[Outcome::Completed, Outcome::Interrupted, Outcome::Cancelled]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Interrupted => "interrupted",
            Outcome::Cancelled => "cancelled",
        }
    }

    /// The terminal state a transition lands in for this outcome.
    pub fn terminal_state(&self) -> TransitionState {
        match self {
            Outcome::Completed => TransitionState::Completed,
            Outcome::Interrupted => TransitionState::Interrupted,
            Outcome::Cancelled => TransitionState::Cancelled,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" | "complete" => Ok(Outcome::Completed),
            "interrupted" => Ok(Outcome::Interrupted),
            "cancelled" | "canceled" => Ok(Outcome::Cancelled),
            _ => anyhow::bail!(
                "Invalid outcome '{}'. Valid values: completed, interrupted, cancelled",
                s
            ),
        }
    }
}

/// One in-flight or completed page navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub state: TransitionState,
    /// Present only while payload upload is occurring
    #[serde(default)]
    pub upload_percentage: Option<f64>,
}

impl Transition {
    pub fn new() -> Self {
        Self {
            id: TransitionId::new(),
            state: TransitionState::Pending,
            upload_percentage: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The outcome this transition ended with, if terminal.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            TransitionState::Completed => Some(Outcome::Completed),
            TransitionState::Interrupted => Some(Outcome::Interrupted),
            TransitionState::Cancelled => Some(Outcome::Cancelled),
            _ => None,
        }
    }

    pub(crate) fn mark_started(&mut self) {
        self.state = TransitionState::Started;
        self.upload_percentage = None;
    }

    pub(crate) fn record_progress(&mut self, percentage: f64) {
        self.state = TransitionState::InProgress;
        self.upload_percentage = Some(percentage);
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        self.state = outcome.terminal_state();
        self.upload_percentage = None;
    }
}

impl Default for Transition {
    fn default() -> Self {
        Self::new()
    }
}
