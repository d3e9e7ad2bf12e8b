//! An indicator that remembers what it was asked to do.

use super::Indicator;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One call made on a [`RecordingIndicator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", content = "fraction", rename_all = "snake_case")]
pub enum IndicatorAction {
    Start,
    Set(f64),
    Done,
    Remove,
}

#[derive(Debug, Default)]
struct RecordingState {
    actions: Vec<IndicatorAction>,
    position: Option<f64>,
}

/// Records every call and tracks visibility, without drawing anything.
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    state: Mutex<RecordingState>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn actions(&self) -> Vec<IndicatorAction> {
        self.lock().actions.clone()
    }

    /// Drain the recorded actions, keeping visibility state.
    pub fn take_actions(&self) -> Vec<IndicatorAction> {
        std::mem::take(&mut self.lock().actions)
    }
}

impl Indicator for RecordingIndicator {
    fn start(&self) {
        let mut state = self.lock();
        state.actions.push(IndicatorAction::Start);
        if state.position.is_none() {
            state.position = Some(0.0);
        }
    }

    fn set(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut state = self.lock();
        state.actions.push(IndicatorAction::Set(fraction));
        state.position = Some(fraction);
    }

    fn done(&self) {
        let mut state = self.lock();
        state.actions.push(IndicatorAction::Done);
        state.position = None;
    }

    fn remove(&self) {
        let mut state = self.lock();
        state.actions.push(IndicatorAction::Remove);
        state.position = None;
    }

    fn is_started(&self) -> bool {
        self.lock().position.is_some()
    }

    fn status(&self) -> Option<f64> {
        self.lock().position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_follows_calls() {
        let indicator = RecordingIndicator::new();
        assert!(!indicator.is_started());

        indicator.start();
        assert_eq!(indicator.status(), Some(0.0));

        indicator.set(1.7);
        assert_eq!(indicator.status(), Some(1.0));

        indicator.remove();
        assert!(!indicator.is_started());

        assert_eq!(
            indicator.take_actions(),
            vec![
                IndicatorAction::Start,
                IndicatorAction::Set(1.0),
                IndicatorAction::Remove
            ]
        );
        assert!(indicator.actions().is_empty());
    }

    #[test]
    fn test_start_keeps_existing_position() {
        let indicator = RecordingIndicator::new();
        indicator.set(0.4);
        indicator.start();
        assert_eq!(indicator.status(), Some(0.4));
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&IndicatorAction::Set(0.5)).unwrap();
        assert_eq!(json, r#"{"action":"set","fraction":0.5}"#);
        let json = serde_json::to_string(&IndicatorAction::Done).unwrap();
        assert_eq!(json, r#"{"action":"done"}"#);
    }
}
