//! Progress indicators driven by transition events.
//!
//! [`Indicator`] is the small surface an observer needs from a loading bar:
//! show it, move it, complete it, or remove it outright. The
//! [`DelayGatedObserver`] wires an indicator to an
//! [`EventBus`](crate::events::EventBus) so that quick visits never flash
//! the bar at all.

pub mod gated;
pub mod recording;
pub mod terminal;

pub use gated::{DEFAULT_DELAY, DelayGatedObserver, GateState};
pub use recording::{IndicatorAction, RecordingIndicator};
pub use terminal::TerminalIndicator;

/// A loading indicator.
///
/// Fractions are in `[0, 1]`; implementations clamp anything outside.
pub trait Indicator: Send + Sync {
    /// Show the indicator at its start position. No-op if already shown.
    fn start(&self);

    /// Move the indicator to `fraction`, showing it if hidden.
    fn set(&self, fraction: f64);

    /// Animate to full and hide.
    fn done(&self);

    /// Hide immediately, skipping the completion animation.
    fn remove(&self);

    fn is_started(&self) -> bool;

    /// Current position, or `None` while hidden.
    fn status(&self) -> Option<f64>;
}
