//! Transition event bus.
//!
//! The bus is the contract between a navigation driver and any number of
//! observers (progress indicators, telemetry, custom hooks). Observers
//! subscribe to one of three lifecycle points:
//!
//! - `start` - a new transition began
//! - `progress` - request payload upload advanced (zero or more times)
//! - `finish` - the transition ended as completed, interrupted or cancelled
//!
//! For one transition, delivery is always `start`, then any `progress`, then
//! exactly one `finish`. Starting a new transition while another is in
//! flight finishes the old one as interrupted before the new `start` goes out.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use transit::events::{EventBus, EventKind};
//! use transit::transition::{Outcome, Transition};
//!
//! let bus = Arc::new(EventBus::new());
//! let sub = bus.on(EventKind::Finish, |event| {
//!     println!("finished: {:?}", event.outcome());
//!     Ok(())
//! });
//!
//! let mut visit = Transition::new();
//! bus.emit_start(&mut visit);
//! bus.emit_progress(&mut visit, 50.0);
//! bus.emit_finish(&mut visit, Outcome::Completed);
//!
//! bus.off(sub);
//! ```

pub mod bus;
pub mod reporter;
pub mod types;

pub use bus::{EventBus, Handler};
pub use reporter::{CollectingReporter, ErrorReporter, TracingReporter};
pub use types::{
    EventKind, Progress, SubscriptionId, TransitionEvent, TransitionSnapshot, UPLOAD_PROGRESS_CAP,
};
