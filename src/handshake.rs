//! Creation handshake.
//!
//! A [`CreationContext`] travels from the creator to the freshly spawned worker.
//! It carries the factory, the ready notification, and the handle that will be
//! given to the creator. The worker consumes it exactly once: `complete` on
//! success, `fail` on error. A context dropped without either still notifies the
//! creator with [`ActorError::Dropped`], so a waiting `create_sync` never hangs on
//! a lost token.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::actor::Actor;
use crate::error::{panic_message, ActorError, BoxError, Result};
use crate::runtime::Shared;

pub(crate) type Factory<T> = Box<dyn FnOnce() -> std::result::Result<T, BoxError> + Send>;
pub(crate) type Notify<T> = Box<dyn FnOnce(Result<Actor<T>>) + Send>;

pub(crate) struct CreationContext<T: 'static> {
    factory: Option<Factory<T>>,
    notify: Option<Notify<T>>,
    actor: Option<Actor<T>>,
    shared: Arc<Shared>,
}

impl<T: 'static> CreationContext<T> {
    pub(crate) fn new(factory: Factory<T>, notify: Notify<T>, actor: Actor<T>) -> Self {
        let shared = Arc::clone(actor.shared());
        Self {
            factory: Some(factory),
            notify: Some(notify),
            actor: Some(actor),
            shared,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Runs the factory on the current thread. Panics become `CreationFailed`.
    pub(crate) fn construct(&mut self) -> Result<T> {
        let factory = self.factory.take().ok_or(ActorError::Dropped)?;
        match catch_unwind(AssertUnwindSafe(factory)) {
            Ok(Ok(object)) => Ok(object),
            Ok(Err(e)) => Err(ActorError::CreationFailed(e)),
            Err(payload) => Err(ActorError::factory_panicked(&*payload)),
        }
    }

    /// Hands the ready handle to the creator.
    pub(crate) fn complete(mut self) {
        let Some(actor) = self.actor.take() else {
            return;
        };
        self.deliver(Ok(actor));
    }

    /// Reports a failed creation. The handle held by the token is released.
    pub(crate) fn fail(mut self, err: ActorError) {
        self.actor.take();
        self.deliver(Err(err));
    }

    fn deliver(&mut self, result: Result<Actor<T>>) {
        let Some(notify) = self.notify.take() else {
            return;
        };
        let id = self.shared.id();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || notify(result))) {
            error!(actor = %id, panic = %panic_message(&*payload), "Ready callback panicked");
        }
    }
}

impl<T: 'static> Drop for CreationContext<T> {
    fn drop(&mut self) {
        if self.notify.is_some() {
            self.actor.take();
            self.deliver(Err(ActorError::Dropped));
        }
    }
}

/// One-shot slot a blocking creator parks on until the worker fills it.
pub(crate) struct ReadySlot<V> {
    value: Mutex<Option<V>>,
    ready: Condvar,
}

impl<V> ReadySlot<V> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn fill(&self, value: V) {
        let mut slot = self.value.lock();
        *slot = Some(value);
        self.ready.notify_all();
    }

    /// Blocks with no upper bound until [`fill`](Self::fill) is called.
    pub(crate) fn wait(&self) -> V {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.ready.wait(&mut slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActorConfig;
    use crate::runtime::Runtime;

    fn idle_actor() -> Actor<u32> {
        let (runtime, _receiver) = Runtime::new(ActorConfig::default());
        runtime.shared().finish();
        Actor::from_runtime(runtime)
    }

    #[test]
    fn ready_slot_wakes_waiter() {
        let slot = Arc::new(ReadySlot::new());
        let filler = Arc::clone(&slot);
        let thread = std::thread::spawn(move || filler.fill(7));
        assert_eq!(slot.wait(), 7);
        thread.join().unwrap();
    }

    #[test]
    fn dropped_token_notifies_once_with_dropped() {
        let slot = Arc::new(ReadySlot::new());
        let filler = Arc::clone(&slot);
        let ctx = CreationContext::new(
            Box::new(|| Ok(1u32)),
            Box::new(move |result: Result<Actor<u32>>| filler.fill(result)),
            idle_actor(),
        );
        drop(ctx);
        assert!(matches!(slot.wait(), Err(ActorError::Dropped)));
    }

    #[test]
    fn construct_converts_errors_and_panics() {
        let mut failing = CreationContext::new(
            Box::new(|| Err::<u32, BoxError>("no config".into())),
            Box::new(|_| {}),
            idle_actor(),
        );
        let err = failing.construct().unwrap_err();
        assert_eq!(err.to_string(), "Managed object creation failed: no config");
        assert!(matches!(failing.construct(), Err(ActorError::Dropped)));

        let mut panicking: CreationContext<u32> = CreationContext::new(
            Box::new(|| -> std::result::Result<u32, BoxError> { panic!("ctor exploded") }),
            Box::new(|_| {}),
            idle_actor(),
        );
        assert!(matches!(
            panicking.construct(),
            Err(ActorError::CreationFailed(_))
        ));
    }

    #[test]
    fn complete_delivers_handle_exactly_once() {
        let slot = Arc::new(ReadySlot::new());
        let filler = Arc::clone(&slot);
        let actor = idle_actor();
        let id = actor.id();
        let ctx = CreationContext::new(
            Box::new(|| Ok(1u32)),
            Box::new(move |result: Result<Actor<u32>>| filler.fill(result.map(|a| a.id()))),
            actor,
        );
        ctx.complete();
        assert_eq!(slot.wait().unwrap(), id);
    }
}
