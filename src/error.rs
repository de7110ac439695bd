//! # Actor Errors
//!
//! Most runtime operations report failure as a plain `bool` (a stopped actor, a
//! timed-out wait). The types here are used only where a caller needs to know
//! *why* something failed, most importantly the creation handshake: a factory
//! that fails or panics is reported through the same channel that would have
//! carried the ready handle.

use std::any::Any;
use std::time::Duration;

/// Boxed error produced by a fallible factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type Result<T, E = ActorError> = std::result::Result<T, E>;

/// Errors that can cross the worker thread boundary.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Managed object creation failed: {0}")]
    CreationFailed(BoxError),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to build worker event loop: {0}")]
    EventLoop(#[source] std::io::Error),
    #[error("Actor closed")]
    Closed,
    #[error("Actor dropped the request")]
    Dropped,
    #[error("Managed object is already borrowed by a running handler")]
    Reentrant,
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl ActorError {
    pub(crate) fn factory_panicked(payload: &(dyn Any + Send)) -> Self {
        Self::CreationFailed(format!("factory panicked: {}", panic_message(payload)).into())
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
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

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static text");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 42");

        let payload: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }

    #[test]
    fn factory_panic_becomes_creation_failed() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = ActorError::factory_panicked(&*payload);
        assert!(matches!(err, ActorError::CreationFailed(_)));
        assert_eq!(
            err.to_string(),
            "Managed object creation failed: factory panicked: boom"
        );
    }
}
