//! # Thread Runtime
//!
//! This module owns the worker side of an actor: one dedicated OS thread, the
//! event loop running on it, and the single managed object it hosts.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Starting -> Running -> Quitting -> Finished
//! ```
//!
//! - **Idle -> Starting**: the creator spawns the worker thread.
//! - **Starting -> Running**: the worker builds the managed object by calling the
//!   factory, notifies the creator, then enters its loop.
//! - **Running -> Quitting**: `quit()` appends a quit marker to the queue.
//!   Everything posted before the marker is still processed.
//! - **Quitting -> Finished**: the loop returns, the managed object is dropped
//!   *on the worker thread*, leftover events are discarded, and waiters wake up.
//!
//! ## Concurrency Model
//!
//! The worker runs a Tokio current-thread runtime driving a `LocalSet`, so a
//! handler can `spawn_local` helper tasks next to the object. Events arrive over
//! an unbounded MPSC queue and are dispatched one at a time; the object is never
//! touched from any other thread.
//!
//! Cross-thread state lives in [`Shared`]: the run state behind a `parking_lot`
//! mutex and condvar for blocking waiters, plus a `watch` channel for async
//! observers.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::LocalSet;
use tracing::{debug, error, info, trace, warn};

use crate::config::ActorConfig;
use crate::error::{panic_message, ActorError};
use crate::event::{Command, Event};
use crate::handshake::CreationContext;
use crate::notify::{self, FinishedCallback};

/// Process-unique identity of one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Run state of a thread runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Quitting,
    Finished,
}

struct Lifecycle {
    state: RunState,
    /// Set while the managed object exists. A quit during `Starting` moves
    /// the state to `Quitting` before there is an object to deliver to.
    object: bool,
    listeners: Vec<FinishedCallback>,
}

/// State shared between the handle side and the worker thread.
pub(crate) struct Shared {
    id: ActorId,
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
    observers: watch::Sender<RunState>,
    worker: OnceLock<ThreadId>,
    hung: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let (observers, _) = watch::channel(RunState::Idle);
        Self {
            id: ActorId::next(),
            lifecycle: Mutex::new(Lifecycle {
                state: RunState::Idle,
                object: false,
                listeners: Vec::new(),
            }),
            changed: Condvar::new(),
            observers,
            worker: OnceLock::new(),
            hung: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ActorId {
        self.id
    }

    pub(crate) fn state(&self) -> RunState {
        self.lifecycle.lock().state
    }

    /// Whether the managed object exists and events are accepted.
    pub(crate) fn has_object(&self) -> bool {
        let lifecycle = self.lifecycle.lock();
        lifecycle.object && lifecycle.state != RunState::Finished
    }

    fn set(&self, lifecycle: &mut Lifecycle, state: RunState) {
        lifecycle.state = state;
        self.changed.notify_all();
        self.observers.send_replace(state);
    }

    /// `Idle -> Starting`.
    pub(crate) fn begin_start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == RunState::Idle {
            self.set(&mut lifecycle, RunState::Starting);
        }
    }

    /// Records the new object and moves `Starting -> Running`. A quit that
    /// raced ahead of startup wins; the object still counts as present.
    fn mark_running(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.object = true;
        if lifecycle.state != RunState::Starting {
            return false;
        }
        self.set(&mut lifecycle, RunState::Running);
        true
    }

    /// `Starting | Running -> Quitting`. Returns `true` only for the caller
    /// that performed the transition.
    pub(crate) fn request_quit(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            RunState::Starting | RunState::Running => {
                self.set(&mut lifecycle, RunState::Quitting);
                true
            }
            _ => false,
        }
    }

    fn release_object(&self) {
        self.lifecycle.lock().object = false;
    }

    /// Moves to `Finished` and hands the registered callbacks to the notifier.
    pub(crate) fn finish(&self) {
        let listeners = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == RunState::Finished {
                return;
            }
            lifecycle.object = false;
            self.set(&mut lifecycle, RunState::Finished);
            std::mem::take(&mut lifecycle.listeners)
        };
        notify::dispatch(self.id, listeners);
    }

    pub(crate) fn on_finished(&self, callback: FinishedCallback) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == RunState::Finished {
            drop(lifecycle);
            notify::dispatch(self.id, vec![callback]);
        } else {
            lifecycle.listeners.push(callback);
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<RunState> {
        self.observers.subscribe()
    }

    /// Blocks until `Finished` or until `timeout` elapses.
    pub(crate) fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut lifecycle = self.lifecycle.lock();
        while lifecycle.state != RunState::Finished {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut lifecycle, deadline).timed_out() {
                        return lifecycle.state == RunState::Finished;
                    }
                }
                None => self.changed.wait(&mut lifecycle),
            }
        }
        true
    }

    fn tag_worker(&self) {
        let _ = self.worker.set(std::thread::current().id());
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker.get() == Some(&std::thread::current().id())
    }

    pub(crate) fn mark_hung(&self) {
        self.hung.store(true, Ordering::Release);
    }

    fn is_hung(&self) -> bool {
        self.hung.load(Ordering::Acquire)
    }
}

thread_local! {
    /// The managed object of the runtime hosted by this thread, if any.
    static MANAGED: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

/// The managed object of the current worker thread, when it is a `T`.
fn local_object<T: 'static>() -> Option<Rc<RefCell<T>>> {
    let object = MANAGED.with(|slot| slot.borrow().clone())?;
    object.downcast::<RefCell<T>>().ok()
}

/// Handle-side half of a runtime. Dropping the last one quits the worker.
pub(crate) struct Runtime<T: 'static> {
    shared: Arc<Shared>,
    sender: mpsc::UnboundedSender<Command<T>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    config: ActorConfig,
}

impl<T: 'static> Runtime<T> {
    pub(crate) fn new(config: ActorConfig) -> (Self, mpsc::UnboundedReceiver<Command<T>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let runtime = Self {
            shared: Arc::new(Shared::new()),
            sender,
            thread: Mutex::new(None),
            config,
        };
        (runtime, receiver)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn config(&self) -> &ActorConfig {
        &self.config
    }

    pub(crate) fn attach_thread(&self, handle: JoinHandle<()>) {
        *self.thread.lock() = Some(handle);
    }

    pub(crate) fn post_event(&self, event: Event<T>) -> bool {
        if !self.shared.has_object() {
            debug!(actor = %self.shared.id, "Discarding event, no live object");
            return false;
        }
        self.sender.send(Command::Post(event)).is_ok()
    }

    pub(crate) fn send_event(&self, event: Event<T>) -> Result<(), Event<T>> {
        if !self.shared.has_object() {
            return Err(event);
        }
        if self.shared.is_worker_thread() {
            let Some(object) = local_object::<T>() else {
                return Err(event);
            };
            let Ok(mut target) = object.try_borrow_mut() else {
                return Err(event);
            };
            event.dispatch(&mut target);
            return Ok(());
        }

        let (reply, response) = crossbeam_channel::bounded(1);
        if let Err(rejected) = self.sender.send(Command::Send(event, reply)) {
            return match rejected.0 {
                Command::Post(event) | Command::Send(event, _) => Err(event),
                Command::Quit => Ok(()),
            };
        }
        match response.recv() {
            Ok(delivered) => delivered,
            // The handler ran and panicked before replying.
            Err(_) => Ok(()),
        }
    }

    pub(crate) fn call_local<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ActorError> {
        let object = local_object::<T>().ok_or(ActorError::Closed)?;
        let mut target = object.try_borrow_mut().map_err(|_| ActorError::Reentrant)?;
        Ok(f(&mut target))
    }

    pub(crate) fn quit(&self) {
        if self.shared.request_quit() {
            debug!(actor = %self.shared.id, "Quit requested");
            let _ = self.sender.send(Command::Quit);
        }
    }

    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        if self.shared.is_worker_thread() {
            return true;
        }
        self.shared.wait_finished(timeout)
    }

    pub(crate) fn quit_sync(&self, timeout: Duration) -> bool {
        self.quit();
        let finished = self.wait(timeout);
        if !finished {
            warn!(actor = %self.shared.id, ?timeout, "Timeout: actor did not finish in time");
        }
        finished
    }
}

impl<T: 'static> Drop for Runtime<T> {
    fn drop(&mut self) {
        let id = self.shared.id;
        self.quit();
        if self.shared.is_worker_thread() {
            debug!(actor = %id, "Last handle released on the worker thread, detaching");
            return;
        }
        if self.shared.state() != RunState::Finished {
            if self.shared.is_hung() {
                warn!(actor = %id, "Releasing hung actor without waiting");
                return;
            }
            let timeout = self.config.drop_timeout();
            if !self.shared.wait_finished(timeout) {
                warn!(actor = %id, ?timeout, "Timeout: no quit from actor thread");
                return;
            }
        }
        if let Some(handle) = self.thread.get_mut().take() {
            if handle.join().is_err() {
                error!(actor = %id, "Worker thread panicked");
            }
        }
    }
}

enum LoopExit {
    Quit,
    Closed,
    Faulted,
}

/// Body of the worker thread.
pub(crate) fn run_worker<T: 'static>(
    mut ctx: CreationContext<T>,
    mut receiver: mpsc::UnboundedReceiver<Command<T>>,
) {
    let shared = Arc::clone(ctx.shared());
    let id = shared.id;
    shared.tag_worker();

    let event_loop = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(actor = %id, error = %e, "Failed to build event loop");
            shared.finish();
            ctx.fail(ActorError::EventLoop(e));
            return;
        }
    };

    let object = match ctx.construct() {
        Ok(object) => Rc::new(RefCell::new(object)),
        Err(e) => {
            error!(actor = %id, error = %e, "Managed object creation failed");
            shared.finish();
            ctx.fail(e);
            return;
        }
    };
    MANAGED.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&object) as Rc<dyn Any>));

    shared.mark_running();
    info!(
        actor = %id,
        thread = std::thread::current().name().unwrap_or("<unnamed>"),
        "Actor started"
    );
    ctx.complete();

    let local = LocalSet::new();
    let exit = local.block_on(&event_loop, process_events(&object, &mut receiver, id));
    match exit {
        LoopExit::Quit => debug!(actor = %id, "Event loop quit"),
        LoopExit::Closed => debug!(actor = %id, "All handles released, event loop closed"),
        LoopExit::Faulted => {
            shared.request_quit();
        }
    }
    drop(local);

    shared.release_object();
    MANAGED.with(|slot| slot.borrow_mut().take());
    drop(object);

    let discarded = discard_pending(&mut receiver);
    drop(receiver);
    drop(event_loop);

    shared.finish();
    info!(actor = %id, discarded, "Actor finished");
}

async fn process_events<T>(
    object: &RefCell<T>,
    receiver: &mut mpsc::UnboundedReceiver<Command<T>>,
    id: ActorId,
) -> LoopExit {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Post(event) => {
                if !deliver(object, event, id) {
                    return LoopExit::Faulted;
                }
            }
            Command::Send(event, reply) => {
                if !deliver(object, event, id) {
                    return LoopExit::Faulted;
                }
                let _ = reply.send(Ok(()));
            }
            Command::Quit => return LoopExit::Quit,
        }
    }
    LoopExit::Closed
}

fn deliver<T>(object: &RefCell<T>, event: Event<T>, id: ActorId) -> bool {
    trace!(actor = %id, "Dispatching event");
    let mut target = object.borrow_mut();
    match catch_unwind(AssertUnwindSafe(|| event.dispatch(&mut target))) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                actor = %id,
                panic = %panic_message(&*payload),
                "Event handler panicked, stopping actor"
            );
            false
        }
    }
}

/// Closes the queue and drops whatever is still in it. Synchronous senders get
/// their event back.
fn discard_pending<T>(receiver: &mut mpsc::UnboundedReceiver<Command<T>>) -> usize {
    receiver.close();
    let mut discarded = 0;
    while let Ok(command) = receiver.try_recv() {
        match command {
            Command::Post(_) => discarded += 1,
            Command::Send(event, reply) => {
                discarded += 1;
                let _ = reply.send(Err(event));
            }
            Command::Quit => {}
        }
    }
    if discarded > 0 {
        debug!(discarded, "Discarded events queued after quit");
    }
    discarded
}
