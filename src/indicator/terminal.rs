use super::Indicator;
use crate::clock::{Scheduler, TimerId};
use crate::config::IndicatorConfig;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Resolution of the underlying bar.
const STEPS: u64 = 1000;

/// Where `start` places the bar so it is visible straight away.
const START_FRACTION: f64 = 0.08;

/// How long a completed bar stays drawn at full before it is cleared.
pub const DONE_HOLD: Duration = Duration::from_millis(200);

/// A bar drawn at full, waiting to be cleared.
struct Completed {
    bar: ProgressBar,
    generation: u64,
    timer: Option<TimerId>,
}

#[derive(Default)]
struct Bars {
    active: Option<ProgressBar>,
    completed: Option<Completed>,
    generation: u64,
}

/// Loading bar drawn on stderr with `indicatif`.
///
/// A fresh `ProgressBar` is created each time the indicator is shown. After
/// `done` the full bar stays on screen for [`DONE_HOLD`] when a scheduler is
/// attached, and is cleared at once otherwise. Showing the bar again, or
/// removing it, clears a completed bar straight away.
pub struct TerminalIndicator {
    style: ProgressStyle,
    show_spinner: bool,
    hidden: bool,
    scheduler: Option<Arc<dyn Scheduler>>,
    bars: Arc<Mutex<Bars>>,
}

impl TerminalIndicator {
    /// Create an indicator that draws on stderr.
    pub fn new(config: &IndicatorConfig) -> Result<Self> {
        Self::build(config, false)
    }

    /// Create an indicator that tracks state without drawing.
    pub fn hidden(config: &IndicatorConfig) -> Result<Self> {
        Self::build(config, true)
    }

    /// Hold completed bars for [`DONE_HOLD`] using `scheduler`.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    fn build(config: &IndicatorConfig, hidden: bool) -> Result<Self> {
        let color = config.color.to_lowercase();
        let template = if config.show_spinner {
            format!("{{spinner:.{color}}} [{{bar:40.{color}}}] {{percent:>3}}%")
        } else {
            format!("[{{bar:40.{color}}}] {{percent:>3}}%")
        };
        let style = ProgressStyle::default_bar()
            .template(&template)
            .with_context(|| format!("Invalid indicator template for color '{}'", color))?
            .progress_chars("█▓░");

        Ok(Self {
            style,
            show_spinner: config.show_spinner,
            hidden,
            scheduler: None,
            bars: Arc::new(Mutex::new(Bars::default())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Bars> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a completed bar is still on screen.
    pub fn is_completing(&self) -> bool {
        self.lock().completed.is_some()
    }

    fn draw_target(&self) -> ProgressDrawTarget {
        if self.hidden {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        }
    }

    fn clear_completed(&self, bars: &mut Bars) {
        if let Some(completed) = bars.completed.take() {
            if let (Some(scheduler), Some(timer)) = (&self.scheduler, completed.timer) {
                scheduler.cancel(timer);
            }
            completed.bar.finish_and_clear();
        }
    }

    fn show(&self, bars: &mut Bars, fraction: f64) {
        self.clear_completed(bars);
        let bar = bars.active.get_or_insert_with(|| {
            let bar = ProgressBar::with_draw_target(Some(STEPS), self.draw_target());
            bar.set_style(self.style.clone());
            if self.show_spinner {
                bar.enable_steady_tick(Duration::from_millis(100));
            }
            bar
        });
        bar.set_position(to_steps(fraction));
    }
}

fn to_steps(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * STEPS as f64).round() as u64
}

impl Indicator for TerminalIndicator {
    fn start(&self) {
        let mut bars = self.lock();
        if bars.active.is_none() {
            self.show(&mut bars, START_FRACTION);
        }
    }

    fn set(&self, fraction: f64) {
        let mut bars = self.lock();
        self.show(&mut bars, fraction);
    }

    fn done(&self) {
        let mut bars = self.lock();
        let Some(bar) = bars.active.take() else {
            return;
        };
        // Draws the full bar and stops the spinner
        bar.set_position(STEPS);
        bar.finish();

        let Some(scheduler) = &self.scheduler else {
            bar.finish_and_clear();
            return;
        };
        self.clear_completed(&mut bars);
        bars.generation += 1;
        let generation = bars.generation;
        let shared = Arc::clone(&self.bars);
        let timer = scheduler.schedule(
            DONE_HOLD,
            Box::new(move || {
                let mut bars = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if bars.completed.as_ref().map(|c| c.generation) == Some(generation)
                    && let Some(completed) = bars.completed.take()
                {
                    completed.bar.finish_and_clear();
                }
            }),
        );
        bars.completed = Some(Completed {
            bar,
            generation,
            timer: Some(timer),
        });
    }

    fn remove(&self) {
        let mut bars = self.lock();
        self.clear_completed(&mut bars);
        if let Some(bar) = bars.active.take() {
            bar.finish_and_clear();
        }
    }

    fn is_started(&self) -> bool {
        self.lock().active.is_some()
    }

    fn status(&self) -> Option<f64> {
        self.lock()
            .active
            .as_ref()
            .map(|bar| bar.position() as f64 / STEPS as f64)
    }
}

impl Drop for TerminalIndicator {
    fn drop(&mut self) {
        let mut bars = self.lock();
        self.clear_completed(&mut bars);
    }
}
