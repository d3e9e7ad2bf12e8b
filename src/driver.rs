//! Navigation driver: the trusted caller of the bus emission API.
//!
//! The bus does not validate what it is told. The driver does, before
//! anything reaches observers:
//! - upload percentages must be finite and within `0..=100`
//! - percentages never decrease within one transition
//! - progress and finish need an active transition

use crate::errors::DriverError;
use crate::events::EventBus;
use crate::transition::{Outcome, Transition, TransitionId, TransitionState};
use std::sync::Arc;
use tracing::info;

pub struct NavigationDriver {
    bus: Arc<EventBus>,
    current: Option<Transition>,
}

impl NavigationDriver {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, current: None }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The most recent transition this driver started, whatever its state.
    pub fn current(&self) -> Option<&Transition> {
        self.current.as_ref()
    }

    /// Begin a new visit. A visit still in flight is interrupted.
    pub fn visit(&mut self) -> TransitionId {
        let mut transition = Transition::new();
        self.bus.emit_start(&mut transition);
        if let Some(previous) = self.current.take()
            && self.bus.state_of(previous.id) == Some(TransitionState::Interrupted)
        {
            info!(id = %previous.id, next = %transition.id, "Previous visit superseded");
        }
        info!(id = %transition.id, "Visit started");
        let id = transition.id;
        self.current = Some(transition);
        id
    }

    /// Report upload progress for the active visit.
    pub fn progress(&mut self, percentage: f64) -> Result<(), DriverError> {
        if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
            return Err(DriverError::PercentageOutOfRange { percentage });
        }
        let bus = Arc::clone(&self.bus);
        let transition = self.active_mut()?;
        if let Some(previous) = transition.upload_percentage
            && percentage < previous
        {
            return Err(DriverError::PercentageDecreased {
                previous,
                requested: percentage,
            });
        }
        bus.emit_progress(transition, percentage);
        Ok(())
    }

    /// Finish the active visit with `outcome`.
    pub fn finish(&mut self, outcome: Outcome) -> Result<TransitionId, DriverError> {
        let bus = Arc::clone(&self.bus);
        let transition = self.active_mut()?;
        bus.emit_finish(transition, outcome);
        info!(id = %transition.id, %outcome, "Visit finished");
        Ok(transition.id)
    }

    /// The response was fully applied.
    pub fn complete(&mut self) -> Result<TransitionId, DriverError> {
        self.finish(Outcome::Completed)
    }

    /// The caller aborted the visit.
    pub fn cancel(&mut self) -> Result<TransitionId, DriverError> {
        self.finish(Outcome::Cancelled)
    }

    /// The driver's transition, if the bus still considers it in flight.
    ///
    /// Another driver sharing the bus may have interrupted it.
    fn active_mut(&mut self) -> Result<&mut Transition, DriverError> {
        let active = self.bus.active();
        match self.current.as_mut() {
            Some(transition) if active == Some(transition.id) => Ok(transition),
            _ => Err(DriverError::NoActiveTransition),
        }
    }
}
