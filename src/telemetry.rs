//! Telemetry observer: how long visits take and how they end.
//!
//! Subscribes to all three event kinds and turns each finished transition
//! into a [`TransitionRecord`]. Records are logged via `tracing`, kept in
//! memory, and optionally written as JSON lines to a sink.

use crate::events::{EventBus, EventKind, SubscriptionId, TransitionEvent};
use crate::transition::{Outcome, TransitionId};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::info;

/// Summary of one finished transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub id: TransitionId,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Highest upload percentage seen, if any upload progress was reported
    pub max_percentage: Option<f64>,
    pub progress_events: u32,
}

/// Finished transitions by outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub completed: u64,
    pub interrupted: u64,
    pub cancelled: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.completed + self.interrupted + self.cancelled
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Interrupted => self.interrupted += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }
}

struct OpenVisit {
    started: Instant,
    started_at: DateTime<Utc>,
    max_percentage: Option<f64>,
    progress_events: u32,
}

#[derive(Default)]
struct TelemetryState {
    open: HashMap<TransitionId, OpenVisit>,
    records: Vec<TransitionRecord>,
    counts: OutcomeCounts,
}

type Sink = Mutex<Box<dyn Write + Send>>;

struct TelemetryInner {
    state: Mutex<TelemetryState>,
    sink: Option<Sink>,
}

impl TelemetryInner {
    fn lock(&self) -> MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_start(&self, event: &TransitionEvent) {
        self.lock().open.insert(
            event.id(),
            OpenVisit {
                started: Instant::now(),
                started_at: Utc::now(),
                max_percentage: None,
                progress_events: 0,
            },
        );
    }

    fn on_progress(&self, event: &TransitionEvent) {
        let mut state = self.lock();
        if let (Some(visit), Some(pct)) = (state.open.get_mut(&event.id()), event.percentage()) {
            visit.progress_events += 1;
            visit.max_percentage = Some(visit.max_percentage.map_or(pct, |m| m.max(pct)));
        }
    }

    fn on_finish(&self, event: &TransitionEvent) -> Result<()> {
        let Some(outcome) = event.outcome() else {
            return Ok(());
        };
        let record = {
            let mut state = self.lock();
            let Some(visit) = state.open.remove(&event.id()) else {
                // Started before we subscribed
                return Ok(());
            };
            let record = TransitionRecord {
                id: event.id(),
                outcome,
                started_at: visit.started_at,
                duration_ms: visit.started.elapsed().as_millis() as u64,
                max_percentage: visit.max_percentage,
                progress_events: visit.progress_events,
            };
            state.counts.record(outcome);
            state.records.push(record.clone());
            record
        };

        info!(
            id = %record.id,
            outcome = %record.outcome,
            duration_ms = record.duration_ms,
            progress_events = record.progress_events,
            "Transition finished"
        );

        if let Some(sink) = &self.sink {
            let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_writer(&mut *out, &record)
                .context("Failed to serialize transition record")?;
            writeln!(out).context("Failed to write transition record")?;
            out.flush().context("Failed to flush transition record")?;
        }
        Ok(())
    }
}

/// Records timing and outcome for every transition on a bus.
pub struct TelemetryObserver {
    inner: Arc<TelemetryInner>,
    bus: Arc<EventBus>,
    subscriptions: Vec<SubscriptionId>,
}

impl TelemetryObserver {
    /// Attach with in-memory records only.
    pub fn attach(bus: &Arc<EventBus>) -> Self {
        Self::build(bus, None)
    }

    /// Attach and also write each record as one JSON line to `sink`.
    pub fn with_sink(bus: &Arc<EventBus>, sink: Box<dyn Write + Send>) -> Self {
        Self::build(bus, Some(Mutex::new(sink)))
    }

    fn build(bus: &Arc<EventBus>, sink: Option<Sink>) -> Self {
        let inner = Arc::new(TelemetryInner {
            state: Mutex::new(TelemetryState::default()),
            sink,
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
            bus.on(EventKind::Finish, move |event| on_finish.on_finish(event)),
        ];

        Self {
            inner,
            bus: Arc::clone(bus),
            subscriptions,
        }
    }

    pub fn records(&self) -> Vec<TransitionRecord> {
        self.inner.lock().records.clone()
    }

    pub fn counts(&self) -> OutcomeCounts {
        self.inner.lock().counts
    }

    /// Transitions started but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().open.len()
    }
}

impl Drop for TelemetryObserver {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.bus.off(subscription);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingReporter;
    use crate::transition::Transition;

    /// Writer that appends into a shared buffer.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "closed",
            ))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_records_each_outcome() {
        let bus = Arc::new(EventBus::new());
        let telemetry = TelemetryObserver::attach(&bus);

        let mut a = Transition::new();
        bus.emit_start(&mut a);
        bus.emit_progress(&mut a, 30.0);
        bus.emit_progress(&mut a, 70.0);
        let mut b = Transition::new();
        bus.emit_start(&mut b);
        bus.emit_finish(&mut b, Outcome::Cancelled);
        let mut c = Transition::new();
        bus.emit_start(&mut c);
        bus.emit_finish(&mut c, Outcome::Completed);

        let counts = telemetry.counts();
        assert_eq!(
            counts,
            OutcomeCounts {
                completed: 1,
                interrupted: 1,
                cancelled: 1
            }
        );
        assert_eq!(counts.total(), 3);

        let records = telemetry.records();
        assert_eq!(records[0].id, a.id);
        assert_eq!(records[0].outcome, Outcome::Interrupted);
        assert_eq!(records[0].max_percentage, Some(70.0));
        assert_eq!(records[0].progress_events, 2);
        assert_eq!(records[1].max_percentage, None);
        assert_eq!(telemetry.in_flight(), 0);
    }

    #[test]
    fn test_writes_json_lines() {
        let bus = Arc::new(EventBus::new());
        let buf = SharedBuf::default();
        let _telemetry = TelemetryObserver::with_sink(&bus, Box::new(buf.clone()));

        for outcome in [Outcome::Completed, Outcome::Cancelled] {
            let mut t = Transition::new();
            bus.emit_start(&mut t);
            bus.emit_finish(&mut t, outcome);
        }

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["outcome"], "completed");
        assert_eq!(lines[1]["outcome"], "cancelled");
        assert!(lines[0]["duration_ms"].is_u64());
    }

    #[test]
    fn test_sink_failure_is_reported_not_propagated() {
        let reporter = Arc::new(CollectingReporter::new());
        let bus = Arc::new(EventBus::with_reporter(reporter.clone()));
        let telemetry = TelemetryObserver::with_sink(&bus, Box::new(BrokenPipe));

        let mut t = Transition::new();
        bus.emit_start(&mut t);
        bus.emit_finish(&mut t, Outcome::Completed);

        assert_eq!(telemetry.counts().completed, 1);
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_ignores_transitions_started_before_attach() {
        let bus = Arc::new(EventBus::new());
        let mut t = Transition::new();
        bus.emit_start(&mut t);

        let telemetry = TelemetryObserver::attach(&bus);
        bus.emit_finish(&mut t, Outcome::Completed);
        assert!(telemetry.records().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        {
            let _telemetry = TelemetryObserver::attach(&bus);
            assert_eq!(bus.handler_count(EventKind::Finish), 1);
        }
        assert_eq!(bus.handler_count(EventKind::Finish), 0);
    }
}
