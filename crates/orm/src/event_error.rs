//! Errors produced by lifecycle hooks.
//!
//! `Halted` is the deliberate veto value: a `*ing` hook returning it aborts
//! the surrounding save/delete without being treated as a failure of the hook
//! itself.

use std::fmt;

/// Error type returned by entity observers
#[derive(Debug, Clone)]
pub enum EventError {
    /// A hook vetoed the operation; the save/delete is aborted cleanly
    Halted { reason: String },
    /// A hook failed while running
    HandlerFailed { message: String },
}

impl EventError {
    /// Construct the veto value that aborts the current persistence phase
    pub fn halt(reason: impl Into<String>) -> Self {
        EventError::Halted {
            reason: reason.into(),
        }
    }

    /// Construct a hook failure
    pub fn handler(message: impl Into<String>) -> Self {
        EventError::HandlerFailed {
            message: message.into(),
        }
    }

    /// True when this error is the veto value rather than a real failure
    pub fn is_halt(&self) -> bool {
        matches!(self, EventError::Halted { .. })
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Halted { reason } => write!(f, "Operation halted by hook: {}", reason),
            EventError::HandlerFailed { message } => write!(f, "Hook failed: {}", message),
        }
    }
}

impl std::error::Error for EventError {}
