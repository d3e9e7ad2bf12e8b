//! Where handler failures go.
//!
//! The bus never propagates a handler failure to the driver. It hands the
//! failure to an [`ErrorReporter`] and moves on to the next handler.

use crate::errors::HandlerError;
use std::error::Error;
use std::sync::{Mutex, PoisonError};

/// Receives handler failures caught during delivery.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: HandlerError);
}

/// Render a failure with its whole source chain, `outer: inner: ...`.
pub fn describe(error: &HandlerError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Default reporter: logs every failure at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: HandlerError) {
        tracing::error!(
            kind = %error.kind(),
            subscription = %error.subscription(),
            "{}",
            describe(&error)
        );
    }
}

/// Keeps failures in memory so callers can inspect them later.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    errors: Mutex<Vec<HandlerError>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain and return every collected failure.
    pub fn take(&self) -> Vec<HandlerError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: HandlerError) {
        tracing::warn!("{}", describe(&error));
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }
}
