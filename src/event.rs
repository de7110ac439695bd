//! # Events
//!
//! An [`Event`] is a unit of work executed on an actor's worker thread against
//! its managed object. The payload is a closure, so the event loop never
//! inspects message types: it takes the next event and invokes it.
//!
//! Ownership differs between the two delivery paths:
//!
//! - [`Actor::post_event`](crate::Actor::post_event) takes the event. If the
//!   actor cannot accept it, the event is dropped on the spot and the call
//!   returns `false`.
//! - [`Actor::send_event`](crate::Actor::send_event) hands an undelivered
//!   event back to the caller as `Err(event)`.

use std::fmt;

/// A closure executed on the actor's own thread with exclusive access to the
/// managed object.
pub struct Event<T> {
    payload: Box<dyn FnOnce(&mut T) + Send>,
}

impl<T> Event<T> {
    pub fn new(f: impl FnOnce(&mut T) + Send + 'static) -> Self {
        Self {
            payload: Box::new(f),
        }
    }

    pub(crate) fn dispatch(self, target: &mut T) {
        (self.payload)(target)
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").finish_non_exhaustive()
    }
}

/// Reply channel for synchronous delivery. An event that never ran comes back
/// as `Err`. The receiving side blocks on a plain channel, so it works from
/// any thread, including another actor's handler.
pub(crate) type SendReply<T> = crossbeam_channel::Sender<Result<(), Event<T>>>;

/// Internal queue entry processed by the worker loop.
pub(crate) enum Command<T> {
    Post(Event<T>),
    Send(Event<T>, SendReply<T>),
    Quit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_runs_payload_against_target() {
        let event = Event::new(|n: &mut u32| *n += 5);
        let mut value = 1;
        event.dispatch(&mut value);
        assert_eq!(value, 6);
    }

    #[test]
    fn debug_hides_payload() {
        let event = Event::new(|_: &mut ()| {});
        assert_eq!(format!("{event:?}"), "Event { .. }");
    }
}
