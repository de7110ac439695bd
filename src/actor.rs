//! # Actor Handle
//!
//! [`Actor<T>`] is the public, reference-counted handle to a thread runtime
//! hosting one managed object of type `T`. Handles are cheap to clone and can
//! be shared, moved, and dropped from any thread. Two handles are equal when
//! they point at the same runtime.
//!
//! ## Creating actors
//!
//! The factory always runs on the new worker thread, so `T` itself does not
//! need to be `Send`:
//!
//! - [`Actor::create`]: non-blocking; the ready callback fires on the worker.
//! - [`Actor::create_sync`]: blocks until the object exists.
//! - [`Actor::create_async`]: awaits the handshake from async code.
//! - `try_*` variants accept fallible factories. Errors and panics arrive as
//!   [`ActorError::CreationFailed`].
//!
//! ```rust
//! use pinned_actor::Actor;
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Counter {
//!     hits: u64,
//! }
//!
//! let actor = Actor::create_sync(Counter::default).unwrap();
//! for _ in 0..10 {
//!     assert!(actor.post(|c: &mut Counter| c.hits += 1));
//! }
//! let hits = actor.request_blocking(|c: &mut Counter| c.hits).unwrap();
//! assert_eq!(hits, 10);
//! assert!(actor.quit_sync(Duration::from_secs(5)));
//! assert!(!actor.post(|c: &mut Counter| c.hits += 1));
//! ```
//!
//! ## Dropping handles
//!
//! Releasing a handle never touches the runtime while another handle, or a
//! live exit-registry snapshot, still refers to it. Releasing the *last* handle
//! of a running actor quits it and waits up to
//! [`ActorConfig::drop_timeout_ms`](crate::ActorConfig::drop_timeout_ms).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::error;

use crate::config::ActorConfig;
use crate::error::{ActorError, BoxError, Result};
use crate::event::Event;
use crate::exit::{ExitRegistry, Quiesce};
use crate::handshake::{CreationContext, Factory, Notify, ReadySlot};
use crate::runtime::{self, ActorId, RunState, Runtime, Shared};

/// Reference-counted handle to a dedicated-thread runtime hosting one `T`.
pub struct Actor<T: 'static> {
    inner: Arc<Runtime<T>>,
}

impl<T: 'static> Actor<T> {
    pub(crate) fn from_runtime(runtime: Runtime<T>) -> Self {
        Self {
            inner: Arc::new(runtime),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        self.inner.shared()
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn Quiesce> {
        let weak: Weak<Runtime<T>> = Arc::downgrade(&self.inner);
        weak
    }

    /// Spawns a worker and builds the object there. `on_ready` runs on the
    /// worker thread, exactly once, before the first event is processed.
    pub fn create<F, R>(factory: F, on_ready: R)
    where
        F: FnOnce() -> T + Send + 'static,
        R: FnOnce(Result<Actor<T>>) + Send + 'static,
    {
        Builder::new().create(factory, on_ready)
    }

    /// Blocks until the object exists. There is no timeout: a factory that
    /// never returns blocks the caller forever. Must not be called from a
    /// thread the new actor is expected to serve.
    pub fn create_sync<F>(factory: F) -> Result<Actor<T>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Builder::new().create_sync(factory)
    }

    pub async fn create_async<F>(factory: F) -> Result<Actor<T>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Builder::new().create_async(factory).await
    }

    pub fn try_create<F, E, R>(factory: F, on_ready: R)
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<BoxError>,
        R: FnOnce(Result<Actor<T>>) + Send + 'static,
    {
        Builder::new().try_create(factory, on_ready)
    }

    pub fn try_create_sync<F, E>(factory: F) -> Result<Actor<T>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Builder::new().try_create_sync(factory)
    }

    /// Queues `event` for the worker. Returns `false`, dropping the event, when
    /// the object does not exist (not yet built or already finished).
    pub fn post_event(&self, event: Event<T>) -> bool {
        self.inner.post_event(event)
    }

    /// Shorthand for `post_event(Event::new(f))`.
    pub fn post(&self, f: impl FnOnce(&mut T) + Send + 'static) -> bool {
        self.post_event(Event::new(f))
    }

    /// Runs `event` synchronously and returns once it has been handled.
    ///
    /// On the worker thread the event is dispatched directly, which only works
    /// outside a running handler. From any other thread the caller blocks until
    /// the worker has processed it. An event that could not be delivered is
    /// handed back as `Err(event)`.
    ///
    /// The wait is a plain blocking wait and is safe from any thread,
    /// including another actor's handler. Two actors blocking on each other
    /// deadlock. From async code prefer [`request`](Self::request).
    pub fn send_event(&self, event: Event<T>) -> std::result::Result<(), Event<T>> {
        self.inner.send_event(event)
    }

    /// Computes a value on the worker thread.
    pub async fn request<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let posted = self.post(move |object| {
            let _ = reply.send(f(object));
        });
        if !posted {
            return Err(ActorError::Closed);
        }
        response.await.map_err(|_| ActorError::Dropped)
    }

    /// Blocking form of [`request`](Self::request). On the worker thread the
    /// closure runs directly, failing with [`ActorError::Reentrant`] inside a
    /// handler.
    ///
    /// Blocks like [`send_event`](Self::send_event).
    pub fn request_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_worker_thread() {
            return self.inner.call_local(f);
        }
        let (reply, response) = crossbeam_channel::bounded(1);
        let posted = self.post(move |object| {
            let _ = reply.send(f(object));
        });
        if !posted {
            return Err(ActorError::Closed);
        }
        response.recv().map_err(|_| ActorError::Dropped)
    }

    /// Asks the event loop to stop after the events already queued. Idempotent.
    pub fn quit(&self) {
        self.inner.quit()
    }

    /// `quit` then `wait`. `false` means the worker is still running.
    pub fn quit_sync(&self, timeout: Duration) -> bool {
        self.inner.quit_sync(timeout)
    }

    /// Blocks until `Finished` without requesting a quit. Returns immediately
    /// with `true` on the worker thread itself.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.inner.wait(timeout)
    }

    /// Like [`wait`](Self::wait) but reports a timeout as an error.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        if self.wait(timeout) {
            Ok(())
        } else {
            Err(ActorError::Timeout(timeout))
        }
    }

    /// Resolves once the runtime reaches `Finished`.
    pub async fn finished(&self) {
        let mut observer = self.subscribe();
        let _ = observer.wait_for(|state| *state == RunState::Finished).await;
    }

    /// Registers `callback` for the finished signal. It fires exactly once,
    /// on a background notifier thread, even if the runtime already finished.
    pub fn on_finished(&self, callback: impl FnOnce(ActorId) + Send + 'static) {
        self.shared().on_finished(Box::new(callback));
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.shared().subscribe()
    }

    /// Hands shutdown of this actor to the process-wide exit registry.
    pub fn register_for_exit(&self) {
        ExitRegistry::global().register(self);
    }

    pub fn id(&self) -> ActorId {
        self.shared().id()
    }

    pub fn state(&self) -> RunState {
        self.shared().state()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == RunState::Finished
    }

    /// Whether the calling thread is this actor's worker.
    pub fn is_worker_thread(&self) -> bool {
        self.shared().is_worker_thread()
    }

    /// Number of live handles to this runtime.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn name(&self) -> &str {
        &self.inner.config().name
    }
}

impl<T: 'static> Clone for Actor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> PartialEq for Actor<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: 'static> Eq for Actor<T> {}

impl<T: 'static> Hash for Actor<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<T: 'static> fmt::Debug for Actor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Configures and spawns actors.
///
/// ```rust
/// use pinned_actor::Builder;
/// use std::time::Duration;
///
/// let actor = Builder::new()
///     .name("parser")
///     .create_sync(|| Vec::<String>::new())
///     .unwrap();
/// assert_eq!(actor.name(), "parser");
/// assert!(actor.quit_sync(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: ActorConfig,
    exit_cleanup: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ActorConfig) -> Self {
        Self {
            config,
            exit_cleanup: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    pub fn drop_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_drop_timeout(timeout);
        self
    }

    /// Registers every actor spawned by this builder with the global
    /// [`ExitRegistry`].
    pub fn exit_cleanup(mut self, enabled: bool) -> Self {
        self.exit_cleanup = enabled;
        self
    }

    pub fn create<T, F, R>(self, factory: F, on_ready: R)
    where
        T: 'static,
        F: FnOnce() -> T + Send + 'static,
        R: FnOnce(Result<Actor<T>>) + Send + 'static,
    {
        self.launch(Box::new(move || Ok::<T, BoxError>(factory())), Box::new(on_ready))
    }

    pub fn create_sync<T, F>(self, factory: F) -> Result<Actor<T>>
    where
        T: 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.launch_sync(Box::new(move || Ok::<T, BoxError>(factory())))
    }

    pub async fn create_async<T, F>(self, factory: F) -> Result<Actor<T>>
    where
        T: 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.launch_async(Box::new(move || Ok::<T, BoxError>(factory()))).await
    }

    pub fn try_create<T, F, E, R>(self, factory: F, on_ready: R)
    where
        T: 'static,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<BoxError>,
        R: FnOnce(Result<Actor<T>>) + Send + 'static,
    {
        self.launch(fallible(factory), Box::new(on_ready))
    }

    pub fn try_create_sync<T, F, E>(self, factory: F) -> Result<Actor<T>>
    where
        T: 'static,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.launch_sync(fallible(factory))
    }

    pub async fn try_create_async<T, F, E>(self, factory: F) -> Result<Actor<T>>
    where
        T: 'static,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.launch_async(fallible(factory)).await
    }

    fn launch_sync<T: 'static>(self, factory: Factory<T>) -> Result<Actor<T>> {
        let slot = Arc::new(ReadySlot::new());
        let filler = Arc::clone(&slot);
        self.launch(
            factory,
            Box::new(move |result: Result<Actor<T>>| filler.fill(result)),
        );
        slot.wait()
    }

    async fn launch_async<T: 'static>(self, factory: Factory<T>) -> Result<Actor<T>> {
        let (ready, handshake) = oneshot::channel();
        self.launch(
            factory,
            Box::new(move |result: Result<Actor<T>>| {
                let _ = ready.send(result);
            }),
        );
        handshake.await.map_err(|_| ActorError::Dropped)?
    }

    fn launch<T: 'static>(self, factory: Factory<T>, notify: Notify<T>) {
        let Builder {
            config,
            exit_cleanup,
        } = self;

        let mut thread = std::thread::Builder::new().name(config.name.clone());
        if let Some(bytes) = config.stack_size {
            thread = thread.stack_size(bytes);
        }

        let (runtime, receiver) = Runtime::new(config);
        let actor = Actor::from_runtime(runtime);
        actor.shared().begin_start();
        if exit_cleanup {
            actor.register_for_exit();
        }

        // The token is parked here so a failed spawn can still notify the creator.
        let handoff = Arc::new(parking_lot::Mutex::new(Some(CreationContext::new(
            factory,
            notify,
            actor.clone(),
        ))));
        let worker_handoff = Arc::clone(&handoff);

        let spawned = thread.spawn(move || {
            let ctx = worker_handoff.lock().take();
            if let Some(ctx) = ctx {
                runtime::run_worker(ctx, receiver);
            }
        });
        match spawned {
            Ok(handle) => actor.inner.attach_thread(handle),
            Err(e) => {
                error!(actor = %actor.id(), error = %e, "Failed to spawn worker thread");
                actor.shared().finish();
                let ctx = handoff.lock().take();
                if let Some(ctx) = ctx {
                    ctx.fail(ActorError::Spawn(e));
                }
            }
        }
    }
}

fn fallible<T, F, E>(factory: F) -> Factory<T>
where
    T: 'static,
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    E: Into<BoxError>,
{
    Box::new(move || factory().map_err(Into::into))
}
