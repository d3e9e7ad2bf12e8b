//! Typed error hierarchy for transit.
//!
//! Three enums cover the three places things go wrong:
//! - `DriverError`: the navigation driver rejecting bad input before it
//!   reaches the bus
//! - `HandlerError`: an observer failing during delivery (reported, never
//!   propagated)
//! - `ScriptError`: a simulation script that cannot be loaded or run

use crate::events::{EventKind, SubscriptionId};
use thiserror::Error;

/// Errors from the navigation driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Upload percentage {percentage} is outside 0..=100")]
    PercentageOutOfRange { percentage: f64 },

    #[error("Upload percentage decreased from {previous} to {requested}")]
    PercentageDecreased { previous: f64, requested: f64 },

    #[error("No transition is active")]
    NoActiveTransition,
}

/// A handler failure caught during delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{kind} handler {subscription} failed")]
    Failed {
        kind: EventKind,
        subscription: SubscriptionId,
        #[source]
        source: anyhow::Error,
    },

    #[error("{kind} handler {subscription} panicked: {message}")]
    Panicked {
        kind: EventKind,
        subscription: SubscriptionId,
        message: String,
    },
}

impl HandlerError {
    pub fn kind(&self) -> EventKind {
        match self {
            HandlerError::Failed { kind, .. } | HandlerError::Panicked { kind, .. } => *kind,
        }
    }

    pub fn subscription(&self) -> SubscriptionId {
        match self {
            HandlerError::Failed { subscription, .. }
            | HandlerError::Panicked { subscription, .. } => *subscription,
        }
    }
}

/// Errors from loading or running a simulation script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse script: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Step {step}: {message}")]
    InvalidStep { step: usize, message: String },

    #[error("Step {step}: {source}")]
    Driver {
        step: usize,
        #[source]
        source: DriverError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_out_of_range_carries_value() {
        let err = DriverError::PercentageOutOfRange { percentage: 120.0 };
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn driver_error_decrease_is_matchable() {
        let err = DriverError::PercentageDecreased {
            previous: 60.0,
            requested: 40.0,
        };
        match &err {
            DriverError::PercentageDecreased {
                previous,
                requested,
            } => {
                assert_eq!(*previous, 60.0);
                assert_eq!(*requested, 40.0);
            }
            _ => panic!("Expected PercentageDecreased"),
        }
    }

    #[test]
    fn handler_error_accessors() {
        let err = HandlerError::Panicked {
            kind: EventKind::Finish,
            subscription: SubscriptionId(7),
            message: "boom".to_string(),
        };
        assert_eq!(err.kind(), EventKind::Finish);
        assert_eq!(err.subscription(), SubscriptionId(7));
        assert_eq!(err.to_string(), "finish handler sub#7 panicked: boom");
    }

    #[test]
    fn handler_error_failed_keeps_source() {
        use std::error::Error as _;
        let err = HandlerError::Failed {
            kind: EventKind::Start,
            subscription: SubscriptionId(1),
            source: anyhow::anyhow!("indicator unavailable"),
        };
        assert_eq!(err.to_string(), "start handler sub#1 failed");
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("indicator unavailable".to_string())
        );
    }

    #[test]
    fn script_error_wraps_driver_error() {
        let err = ScriptError::Driver {
            step: 3,
            source: DriverError::NoActiveTransition,
        };
        assert_eq!(err.to_string(), "Step 3: No transition is active");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&DriverError::NoActiveTransition);
        assert_std_error(&ScriptError::InvalidStep {
            step: 0,
            message: "x".into(),
        });
    }
}
