//! Non-data sentinel values.
//!
//! Blocks communicate "not a value" conditions through the same properties
//! that carry ordinary data: a pending computation publishes [`Event::wait`],
//! a run that declines to emit publishes nothing thanks to
//! [`Event::no_emit`], and a failed run publishes [`Event::error`] so that
//! downstream blocks can react to the failure like any other input. Errors
//! flow through the graph as data; the [`EngineError`](crate::error)
//! hierarchy is reserved for the host-facing API.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// What kind of sentinel an [`Event`] carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The producing block is still working; the value is not ready.
    Wait,
    /// The producing block ran but chose not to emit.
    NoEmit,
    /// The producing block failed; the message describes why.
    Error(Arc<str>),
}

/// A sentinel value distinguishable from ordinary data.
///
/// Every constructed event gets a fresh uid, so two errors with the same
/// message still compare unequal and re-publishing an event always
/// dispatches a change. Dispatch skips writes of an equal value, and a
/// block that fails twice in a row must notify its listeners twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    uid: u64,
    kind: EventKind,
}

impl Event {
    fn new(kind: EventKind) -> Self {
        Self {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// A pending-computation sentinel.
    pub fn wait() -> Self {
        Self::new(EventKind::Wait)
    }

    /// A declined-emission sentinel.
    pub fn no_emit() -> Self {
        Self::new(EventKind::NoEmit)
    }

    /// An error sentinel carrying a message.
    pub fn error(message: impl Into<Arc<str>>) -> Self {
        Self::new(EventKind::Error(message.into()))
    }

    /// The sentinel kind.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Whether this is a pending-computation sentinel.
    pub fn is_wait(&self) -> bool {
        matches!(self.kind, EventKind::Wait)
    }

    /// Whether this is an error sentinel.
    pub fn is_error(&self) -> bool {
        matches!(self.kind, EventKind::Error(_))
    }

    /// The error message, if this is an error event.
    pub fn error_message(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Wait => write!(f, "<wait>"),
            EventKind::NoEmit => write!(f, "<no-emit>"),
            EventKind::Error(msg) => write!(f, "<error: {msg}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_never_equal_across_constructions() {
        let a = Event::error("boom");
        let b = Event::error("boom");
        assert_ne!(a, b);
        // A clone shares the uid and stays equal.
        assert_eq!(a, a.clone());
    }

    #[test]
    fn kind_accessors() {
        assert!(Event::wait().is_wait());
        assert!(!Event::wait().is_error());
        let err = Event::error("nope");
        assert!(err.is_error());
        assert_eq!(err.error_message(), Some("nope"));
        assert_eq!(Event::no_emit().error_message(), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Event::wait().to_string(), "<wait>");
        assert_eq!(Event::error("x").to_string(), "<error: x>");
    }
}
