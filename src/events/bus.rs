//! The transition event bus.
//!
//! `EventBus` is an explicit instance, shared by `Arc`, that the navigation
//! driver calls into and observers subscribe to. It delivers `start`,
//! `progress` and `finish` events synchronously, in registration order.
//!
//! The registration and transition tables sit behind one mutex. Each emit
//! updates them in a single critical section and releases the lock before
//! any handler runs, so a handler may call `on`/`off` freely.
//!
//! Emits are serialized: an emit from a second thread waits until the
//! handlers of the first one have returned, so every observer sees one
//! transition's `finish` before the next transition's `start`. Emitting from
//! inside a handler is a driver bug and is rejected like any other misuse.

use super::reporter::{ErrorReporter, TracingReporter};
use super::types::{EventKind, SubscriptionId, TransitionEvent};
use crate::errors::HandlerError;
use crate::transition::{Outcome, Transition, TransitionId, TransitionState};
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::debug;

/// A registered event handler.
///
/// Returning an error (or panicking) is reported and isolated; later
/// handlers for the same event still run.
pub type Handler = Arc<dyn Fn(&TransitionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Finished ids remembered so late emits can be told apart from unknown ids.
const RETIRED_CAPACITY: usize = 256;

struct Registration {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    /// Kept in insertion order across all kinds
    registrations: Vec<Registration>,
    next_subscription: u64,
    transitions: HashMap<TransitionId, TransitionState>,
    retired: VecDeque<TransitionId>,
    active: Option<TransitionId>,
    /// Thread currently running handlers, if any
    dispatching: Option<ThreadId>,
}

impl BusState {
    fn handlers_for(&self, kind: EventKind) -> Vec<(SubscriptionId, Handler)> {
        self.registrations
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.id, Arc::clone(&r.handler)))
            .collect()
    }

    fn retire(&mut self, id: TransitionId, outcome: Outcome) {
        self.transitions.insert(id, outcome.terminal_state());
        self.retired.push_back(id);
        if self.active == Some(id) {
            self.active = None;
        }
        while self.retired.len() > RETIRED_CAPACITY {
            if let Some(old) = self.retired.pop_front() {
                self.transitions.remove(&old);
            }
        }
    }

    /// State of an in-flight transition, or a description of why it is not one.
    fn in_flight(&self, id: TransitionId) -> Result<TransitionState, &'static str> {
        match self.transitions.get(&id) {
            Some(state) if state.is_terminal() => Err("already terminal"),
            Some(state) => Ok(*state),
            None => Err("unknown transition"),
        }
    }
}

/// Publish/subscribe channel for transition lifecycle events.
pub struct EventBus {
    state: Mutex<BusState>,
    /// Held for the whole of an emit, handlers included
    delivery: Mutex<()>,
    reporter: Arc<dyn ErrorReporter>,
}

/// Clears the dispatching marker once an emit's handlers have returned.
struct DispatchScope<'a>(&'a EventBus);

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        self.0.lock().dispatching = None;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EventBus")
            .field("registrations", &state.registrations.len())
            .field("tracked_transitions", &state.transitions.len())
            .field("active", &state.active)
            .finish()
    }
}

impl EventBus {
    /// Create a bus that logs handler failures via `tracing`.
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(TracingReporter))
    }

    /// Create a bus that sends handler failures to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            delivery: Mutex::new(()),
            reporter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // Handlers never run under this lock, so poisoning means a bug in the
        // bus itself; the tables are still consistent enough to keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `kind`. Handlers run in registration order.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&TransitionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_handler(kind, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn on_handler(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let mut state = self.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.registrations.push(Registration { id, kind, handler });
        debug!(%kind, subscription = %id, "Registered handler");
        id
    }

    /// Remove a registration. Returns `false` if it was already removed.
    pub fn off(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.registrations.len();
        state.registrations.retain(|r| r.id != subscription);
        let removed = state.registrations.len() != before;
        if removed {
            debug!(%subscription, "Removed handler");
        }
        removed
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.lock().registrations.clear();
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock()
            .registrations
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// The transition currently between `start` and `finish`, if any.
    pub fn active(&self) -> Option<TransitionId> {
        self.lock().active
    }

    /// Last known state of a transition this bus has seen.
    pub fn state_of(&self, id: TransitionId) -> Option<TransitionState> {
        self.lock().transitions.get(&id).copied()
    }

    /// Announce a new transition.
    ///
    /// Any still-active transition is finished as interrupted first, so its
    /// `finish` reaches observers before this transition's `start`.
    pub fn emit_start(&self, transition: &mut Transition) {
        let Some(_delivery) = self.begin_delivery(EventKind::Start, transition.id) else {
            return;
        };
        let (superseded, handlers) = {
            let mut state = self.lock();
            if state.transitions.contains_key(&transition.id) {
                drop(state);
                Self::misuse(EventKind::Start, transition.id, "already started");
                return;
            }
            let superseded = match state.active.take() {
                Some(prev) => {
                    state.retire(prev, Outcome::Interrupted);
                    Some((prev, state.handlers_for(EventKind::Finish)))
                }
                None => None,
            };
            transition.mark_started();
            state.transitions.insert(transition.id, transition.state);
            state.active = Some(transition.id);
            state.dispatching = Some(thread::current().id());
            (superseded, state.handlers_for(EventKind::Start))
        };
        let _scope = DispatchScope(self);

        if let Some((prev, finish_handlers)) = superseded {
            debug!(id = %prev, next = %transition.id, "Interrupting active transition");
            self.dispatch(
                &finish_handlers,
                &TransitionEvent::finish(prev, Outcome::Interrupted),
            );
        }
        debug!(id = %transition.id, handlers = handlers.len(), "Emitting start");
        self.dispatch(&handlers, &TransitionEvent::start(transition));
    }

    /// Report upload progress for an in-flight transition.
    ///
    /// The driver is trusted to send values in [0, 100] that never decrease.
    pub fn emit_progress(&self, transition: &mut Transition, percentage: f64) {
        let Some(_delivery) = self.begin_delivery(EventKind::Progress, transition.id) else {
            return;
        };
        let handlers = {
            let mut state = self.lock();
            if let Err(reason) = state.in_flight(transition.id) {
                drop(state);
                Self::misuse(EventKind::Progress, transition.id, reason);
                return;
            }
            state
                .transitions
                .insert(transition.id, TransitionState::InProgress);
            state.dispatching = Some(thread::current().id());
            state.handlers_for(EventKind::Progress)
        };
        let _scope = DispatchScope(self);

        transition.record_progress(percentage);
        debug!(id = %transition.id, percentage, "Emitting progress");
        self.dispatch(
            &handlers,
            &TransitionEvent::progress(transition, percentage),
        );
    }

    /// Finish an in-flight transition. It receives no events afterwards.
    pub fn emit_finish(&self, transition: &mut Transition, outcome: Outcome) {
        let Some(_delivery) = self.begin_delivery(EventKind::Finish, transition.id) else {
            return;
        };
        let handlers = {
            let mut state = self.lock();
            if let Err(reason) = state.in_flight(transition.id) {
                drop(state);
                Self::misuse(EventKind::Finish, transition.id, reason);
                return;
            }
            state.retire(transition.id, outcome);
            state.dispatching = Some(thread::current().id());
            state.handlers_for(EventKind::Finish)
        };
        let _scope = DispatchScope(self);

        transition.finish(outcome);
        debug!(id = %transition.id, %outcome, "Emitting finish");
        self.dispatch(&handlers, &TransitionEvent::finish(transition.id, outcome));
    }

    /// Wait for any other thread's emit to finish delivering.
    ///
    /// Returns `None` when called from inside one of this bus's handlers,
    /// since waiting there would never end.
    fn begin_delivery(&self, kind: EventKind, id: TransitionId) -> Option<MutexGuard<'_, ()>> {
        let reentrant = self.lock().dispatching == Some(thread::current().id());
        if reentrant {
            Self::misuse(kind, id, "emitted from inside a handler");
            return None;
        }
        Some(self.delivery.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Driver bug: fatal in debug builds, ignored in release builds.
    fn misuse(kind: EventKind, id: TransitionId, reason: &str) {
        debug_assert!(false, "{kind} for transition {id} rejected: {reason}");
        debug!(%kind, %id, reason, "Ignoring emit the bus cannot accept");
    }

    fn dispatch(&self, handlers: &[(SubscriptionId, Handler)], event: &TransitionEvent) {
        for (subscription, handler) in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => HandlerError::Failed {
                    kind: event.kind,
                    subscription: *subscription,
                    source,
                },
                Err(payload) => HandlerError::Panicked {
                    kind: event.kind,
                    subscription: *subscription,
                    message: panic_message(payload.as_ref()),
                },
            };
            self.reporter.report(failure);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::reporter::CollectingReporter;

    type Log = Arc<Mutex<Vec<String>>>;

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Handler that appends `"<label>:<kind>:<detail>"` to the log.
    fn recorder(
        log: &Log,
        label: &'static str,
    ) -> impl Fn(&TransitionEvent) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |event: &TransitionEvent| {
            let detail = match (event.outcome(), event.percentage()) {
                (Some(outcome), _) => outcome.to_string(),
                (None, Some(pct)) => format!("{pct}"),
                (None, None) => String::new(),
            };
            log.lock()
                .unwrap()
                .push(format!("{label}:{}:{detail}", event.kind));
            Ok(())
        }
    }

    #[test]
    fn test_start_handlers_fire_once_in_registration_order() {
        let bus = EventBus::new();
        let log = new_log();
        bus.on(EventKind::Start, recorder(&log, "a"));
        bus.on(EventKind::Start, recorder(&log, "b"));
        bus.on(EventKind::Start, recorder(&log, "c"));

        let mut t = Transition::new();
        bus.emit_start(&mut t);

        assert_eq!(entries(&log), vec!["a:start:", "b:start:", "c:start:"]);
        assert_eq!(t.state, TransitionState::Started);
        assert_eq!(bus.active(), Some(t.id));
    }

    #[test]
    fn test_same_closure_may_register_twice() {
        let bus = EventBus::new();
        let log = new_log();
        let handler: Handler = Arc::new(recorder(&log, "dup"));
        let first = bus.on_handler(EventKind::Start, Arc::clone(&handler));
        let second = bus.on_handler(EventKind::Start, handler);
        assert_ne!(first, second);

        bus.emit_start(&mut Transition::new());
        assert_eq!(entries(&log).len(), 2);
    }

    #[test]
    fn test_handlers_only_receive_their_kind() {
        let bus = EventBus::new();
        let log = new_log();
        bus.on(EventKind::Start, recorder(&log, "s"));
        bus.on(EventKind::Progress, recorder(&log, "p"));
        bus.on(EventKind::Finish, recorder(&log, "f"));

        let mut t = Transition::new();
        bus.emit_start(&mut t);
        bus.emit_progress(&mut t, 30.0);
        bus.emit_progress(&mut t, 80.0);
        bus.emit_finish(&mut t, Outcome::Completed);

        assert_eq!(
            entries(&log),
            vec![
                "s:start:",
                "p:progress:30",
                "p:progress:80",
                "f:finish:completed"
            ]
        );
        assert_eq!(t.state, TransitionState::Completed);
        assert_eq!(bus.active(), None);
    }

    #[test]
    fn test_new_start_interrupts_active_transition_first() {
        let bus = EventBus::new();
        let log = new_log();
        bus.on(EventKind::Start, recorder(&log, "obs"));
        bus.on(EventKind::Progress, recorder(&log, "obs"));
        bus.on(EventKind::Finish, recorder(&log, "obs"));

        let mut t1 = Transition::new();
        let mut t2 = Transition::new();
        bus.emit_start(&mut t1);
        bus.emit_progress(&mut t1, 50.0);
        bus.emit_start(&mut t2);

        assert_eq!(
            entries(&log),
            vec![
                "obs:start:",
                "obs:progress:50",
                "obs:finish:interrupted",
                "obs:start:"
            ]
        );
        assert_eq!(bus.state_of(t1.id), Some(TransitionState::Interrupted));
        assert_eq!(bus.active(), Some(t2.id));
    }

    #[test]
    fn test_interrupt_event_carries_previous_id() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(EventKind::Finish, move |event| {
            sink.lock().unwrap().push(event.transition);
            Ok(())
        });

        let mut t1 = Transition::new();
        let mut t2 = Transition::new();
        bus.emit_start(&mut t1);
        bus.emit_start(&mut t2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, t1.id);
        assert!(seen[0].interrupted);
        assert!(!seen[0].completed && !seen[0].cancelled);
    }

    #[test]
    fn test_no_interrupt_after_finish() {
        let bus = EventBus::new();
        let log = new_log();
        bus.on(EventKind::Finish, recorder(&log, "f"));

        let mut t1 = Transition::new();
        bus.emit_start(&mut t1);
        bus.emit_finish(&mut t1, Outcome::Cancelled);
        bus.emit_start(&mut Transition::new());

        assert_eq!(entries(&log), vec!["f:finish:cancelled"]);
    }

    #[test]
    fn test_off_is_idempotent() {
        let bus = EventBus::new();
        let log = new_log();
        let gone = bus.on(EventKind::Start, recorder(&log, "gone"));
        bus.on(EventKind::Start, recorder(&log, "kept"));

        assert!(bus.off(gone));
        assert!(!bus.off(gone));
        assert_eq!(bus.handler_count(EventKind::Start), 1);

        bus.emit_start(&mut Transition::new());
        assert_eq!(entries(&log), vec!["kept:start:"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_delivery() {
        let reporter = Arc::new(CollectingReporter::new());
        let bus = EventBus::with_reporter(reporter.clone());
        let log = new_log();

        bus.on(EventKind::Start, recorder(&log, "first"));
        bus.on(EventKind::Start, |_| anyhow::bail!("indicator missing"));
        bus.on(EventKind::Start, |_| panic!("observer exploded"));
        bus.on(EventKind::Start, recorder(&log, "last"));

        bus.emit_start(&mut Transition::new());

        assert_eq!(entries(&log), vec!["first:start:", "last:start:"]);
        let errors = reporter.take();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], HandlerError::Failed { .. }));
        match &errors[1] {
            HandlerError::Panicked { message, kind, .. } => {
                assert_eq!(message, "observer exploded");
                assert_eq!(*kind, EventKind::Start);
            }
            other => panic!("Expected Panicked, got {other:?}"),
        }
    }

    #[test]
    fn test_handler_may_unsubscribe_during_delivery() {
        let bus = Arc::new(EventBus::new());
        let log = new_log();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let weak_bus = Arc::downgrade(&bus);
        let my_id = Arc::clone(&slot);
        let once_log = Arc::clone(&log);
        let id = bus.on(EventKind::Start, move |_| {
            once_log.lock().unwrap().push("once".to_string());
            if let (Some(bus), Some(id)) = (weak_bus.upgrade(), *my_id.lock().unwrap()) {
                bus.off(id);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit_start(&mut Transition::new());
        bus.emit_start(&mut Transition::new());

        assert_eq!(entries(&log), vec!["once"]);
    }

    #[test]
    fn test_clear_removes_everything() {
        let bus = EventBus::new();
        let log = new_log();
        bus.on(EventKind::Start, recorder(&log, "a"));
        bus.on(EventKind::Finish, recorder(&log, "b"));
        bus.clear();

        let mut t = Transition::new();
        bus.emit_start(&mut t);
        bus.emit_finish(&mut t, Outcome::Completed);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_buses_are_isolated() {
        let a = EventBus::new();
        let b = EventBus::new();
        let log = new_log();
        a.on(EventKind::Start, recorder(&log, "a"));

        b.emit_start(&mut Transition::new());
        assert!(entries(&log).is_empty());
        assert!(a.active().is_none());
    }

    #[test]
    fn test_retired_ids_are_bounded() {
        let bus = EventBus::new();
        for _ in 0..(RETIRED_CAPACITY + 10) {
            let mut t = Transition::new();
            bus.emit_start(&mut t);
            bus.emit_finish(&mut t, Outcome::Completed);
        }
        assert!(bus.lock().transitions.len() <= RETIRED_CAPACITY);
    }

    #[test]
    fn test_concurrent_starts_leave_exactly_one_active() {
        use std::sync::Barrier;

        for _ in 0..200 {
            let bus = Arc::new(EventBus::new());
            let seen: Arc<Mutex<Vec<(EventKind, TransitionId)>>> = Arc::new(Mutex::new(Vec::new()));
            for kind in EventKind::all() {
                let seen = Arc::clone(&seen);
                bus.on(*kind, move |event| {
                    seen.lock().unwrap().push((event.kind, event.id()));
                    Ok(())
                });
            }

            let mut first = Transition::new();
            bus.emit_start(&mut first);

            let barrier = Arc::new(Barrier::new(2));
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let bus = Arc::clone(&bus);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        let mut t = Transition::new();
                        barrier.wait();
                        bus.emit_start(&mut t);
                        t.id
                    })
                })
                .collect();
            let racers: Vec<TransitionId> =
                workers.into_iter().map(|w| w.join().unwrap()).collect();

            let all = [first.id, racers[0], racers[1]];
            let active = bus.active().unwrap();
            assert!(racers.contains(&active));
            let in_flight = all
                .iter()
                .filter(|id| !bus.state_of(**id).unwrap().is_terminal())
                .count();
            assert_eq!(in_flight, 1);

            let seen = seen.lock().unwrap();
            for id in all {
                let start = seen.iter().position(|e| *e == (EventKind::Start, id));
                let finish = seen.iter().position(|e| *e == (EventKind::Finish, id));
                if id == active {
                    assert!(finish.is_none());
                } else {
                    assert_eq!(bus.state_of(id), Some(TransitionState::Interrupted));
                    assert!(start.unwrap() < finish.unwrap());
                }
            }
        }
    }

    #[test]
    fn test_emit_from_inside_handler_is_rejected() {
        let reporter = Arc::new(CollectingReporter::new());
        let bus = Arc::new(EventBus::with_reporter(reporter.clone()));
        let nested: Arc<Mutex<Option<TransitionId>>> = Arc::new(Mutex::new(None));

        let weak_bus = Arc::downgrade(&bus);
        let slot = Arc::clone(&nested);
        bus.on(EventKind::Finish, move |event| {
            if event.outcome() == Some(Outcome::Interrupted)
                && let Some(bus) = weak_bus.upgrade()
            {
                let mut third = Transition::new();
                *slot.lock().unwrap() = Some(third.id);
                bus.emit_start(&mut third);
            }
            Ok(())
        });

        let mut first = Transition::new();
        let mut second = Transition::new();
        bus.emit_start(&mut first);
        bus.emit_start(&mut second);

        let third = nested.lock().unwrap().unwrap();
        assert_eq!(bus.state_of(third), None);
        assert_eq!(bus.state_of(first.id), Some(TransitionState::Interrupted));
        assert_eq!(bus.active(), Some(second.id));

        // Debug builds surface the rejected emit as a panicking handler
        let expected = if cfg!(debug_assertions) { 1 } else { 0 };
        assert_eq!(reporter.len(), expected);

        // The bus is usable again once delivery has finished
        bus.emit_finish(&mut second, Outcome::Completed);
        assert_eq!(bus.active(), None);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "already terminal")]
    fn test_emit_after_finish_panics_in_debug() {
        let bus = EventBus::new();
        let mut t = Transition::new();
        bus.emit_start(&mut t);
        bus.emit_finish(&mut t, Outcome::Completed);
        bus.emit_progress(&mut t, 10.0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "unknown transition")]
    fn test_finish_for_unknown_transition_panics_in_debug() {
        let bus = EventBus::new();
        bus.emit_finish(&mut Transition::new(), Outcome::Cancelled);
    }
}
