//! Delay-gated progress observer.
//!
//! Showing a loading bar for a visit that finishes in 80ms is just flicker.
//! The gated observer waits `delay` after `start` before revealing the
//! indicator, and if the transition finishes first it does nothing at all.
//!
//! ```text
//! Idle --start--> Waiting --timer fires--> Visible --finish--> Idle
//!                    |
//!                    +------ finish (timer cancelled, no action) --> Idle
//! ```
//!
//! Once visible, the `finish` outcome decides how the bar leaves:
//! - completed: `done()` (fill, then hide)
//! - interrupted: `set(0.0)` and stay visible for the next visit
//! - cancelled: `remove()` (hide immediately)

use super::Indicator;
use crate::clock::{Scheduler, TimerId};
use crate::config::IndicatorConfig;
use crate::events::{EventBus, EventKind, SubscriptionId, TransitionEvent, UPLOAD_PROGRESS_CAP};
use crate::transition::Outcome;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Recommended show delay.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(250);

/// Where the gate is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No transition in flight
    Idle,
    /// Transition in flight, show timer armed
    Waiting,
    /// Indicator revealed
    Visible,
}

struct Gate {
    state: GateState,
    timer: Option<TimerId>,
    /// Bumped on every start/finish so a late timer can tell it is stale
    generation: u64,
}

struct GateInner<I: Indicator> {
    indicator: Arc<I>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    upload_cap: f64,
    gate: Mutex<Gate>,
}

impl<I: Indicator + 'static> GateInner<I> {
    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_start(self: &Arc<Self>, event: &TransitionEvent) {
        let mut gate = self.lock();
        if let Some(stale) = gate.timer.take() {
            self.scheduler.cancel(stale);
        }
        gate.generation += 1;

        // Left at the start position by an interruption: keep showing it.
        if self.indicator.is_started() {
            gate.state = GateState::Visible;
            debug!(id = %event.id(), "Indicator already visible");
            return;
        }

        gate.state = GateState::Waiting;
        let generation = gate.generation;
        let inner = Arc::clone(self);
        let timer = self
            .scheduler
            .schedule(self.delay, Box::new(move || inner.reveal(generation)));
        gate.timer = Some(timer);
        let delay_ms = self.delay.as_millis() as u64;
        debug!(id = %event.id(), %timer, delay_ms, "Armed show timer");
    }

    fn reveal(&self, generation: u64) {
        let mut gate = self.lock();
        if gate.generation != generation || gate.state != GateState::Waiting {
            return;
        }
        gate.state = GateState::Visible;
        gate.timer = None;
        self.indicator.start();
    }

    fn on_progress(&self, event: &TransitionEvent) {
        let _gate = self.lock();
        if !self.indicator.is_started() {
            return;
        }
        if let Some(progress) = event.progress.filter(|p| p.percentage > 0.0) {
            self.indicator.set(progress.capped_fraction(self.upload_cap));
        }
    }

    fn on_finish(&self, event: &TransitionEvent) {
        let mut gate = self.lock();
        if let Some(timer) = gate.timer.take() {
            self.scheduler.cancel(timer);
        }
        gate.generation += 1;
        gate.state = GateState::Idle;

        if !self.indicator.is_started() {
            debug!(id = %event.id(), "Finished before the indicator appeared");
            return;
        }

        match event.outcome() {
            Some(Outcome::Completed) => self.indicator.done(),
            Some(Outcome::Interrupted) => self.indicator.set(0.0),
            Some(Outcome::Cancelled) => self.indicator.remove(),
            None => {}
        }
    }
}

/// Observer that reveals an [`Indicator`] only for transitions that outlast
/// a delay.
///
/// Subscriptions live as long as the observer; dropping it detaches from
/// the bus and cancels any pending timer.
pub struct DelayGatedObserver<I: Indicator + 'static> {
    inner: Arc<GateInner<I>>,
    bus: Arc<EventBus>,
    subscriptions: Vec<SubscriptionId>,
}

impl<I: Indicator + 'static> DelayGatedObserver<I> {
    /// Attach with the given delay and the default upload cap.
    pub fn attach(
        bus: &Arc<EventBus>,
        indicator: Arc<I>,
        scheduler: Arc<dyn Scheduler>,
        delay: Duration,
    ) -> Self {
        Self::attach_with(bus, indicator, scheduler, delay, UPLOAD_PROGRESS_CAP)
    }

    /// Attach using delay and upload cap from configuration.
    pub fn from_config(
        bus: &Arc<EventBus>,
        indicator: Arc<I>,
        scheduler: Arc<dyn Scheduler>,
        config: &IndicatorConfig,
    ) -> Self {
        Self::attach_with(bus, indicator, scheduler, config.delay(), config.upload_cap)
    }

    fn attach_with(
        bus: &Arc<EventBus>,
        indicator: Arc<I>,
        scheduler: Arc<dyn Scheduler>,
        delay: Duration,
        upload_cap: f64,
    ) -> Self {
        let inner = Arc::new(GateInner {
            indicator,
            scheduler,
            delay,
            upload_cap: upload_cap.clamp(0.0, 1.0),
            gate: Mutex::new(Gate {
                state: GateState::Idle,
                timer: None,
                generation: 0,
            }),
        });

        let on_start = Arc::clone(&inner);
        let on_progress = Arc::clone(&inner);
        let on_finish = Arc::clone(&inner);
        let subscriptions = vec![
            bus.on(EventKind::Start, move |event| {
                on_start.on_start(event);
                Ok(())
            }),
            bus.on(EventKind::Progress, move |event| {
                on_progress.on_progress(event);
                Ok(())
            }),
            bus.on(EventKind::Finish, move |event| {
                on_finish.on_finish(event);
                Ok(())
            }),
        ];

        Self {
            inner,
            bus: Arc::clone(bus),
            subscriptions,
        }
    }

    pub fn state(&self) -> GateState {
        self.inner.lock().state
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    pub fn indicator(&self) -> &Arc<I> {
        &self.inner.indicator
    }

    /// Stop observing. Safe to call more than once.
    pub fn detach(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.bus.off(subscription);
        }
        let mut gate = self.inner.lock();
        if let Some(timer) = gate.timer.take() {
            self.inner.scheduler.cancel(timer);
        }
        gate.state = GateState::Idle;
    }
}

impl<I: Indicator + 'static> Drop for DelayGatedObserver<I> {
    fn drop(&mut self) {
        self.detach();
    }
}
