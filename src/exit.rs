//! # Exit Registry
//!
//! Process-wide bookkeeping that quiesces every registered actor before the
//! process exits.
//!
//! The registry only holds **weak** references: registering an actor never
//! keeps it alive. Each registration subscribes to the actor's finished signal
//! and removes its own entry once the actor stops, so a long-running process
//! does not accumulate dead entries.
//!
//! ## Shutdown
//!
//! [`ExitRegistry::shutdown`] runs once per registry:
//!
//! 1. Snapshot every entry that still upgrades to a live actor.
//! 2. Ask all of them to quit.
//! 3. Give each a short grace wait to catch actors that stop immediately.
//! 4. Wait for the rest against one shared deadline, logging a warning for
//!    every actor that misses it.
//!
//! A hung actor is reported, never retried, and never allowed to block exit
//! past the deadline.
//!
//! ```rust
//! use pinned_actor::{exit_guard, Builder};
//!
//! let _guard = exit_guard();
//! let worker = Builder::new()
//!     .name("indexer")
//!     .exit_cleanup(true)
//!     .create_sync(|| Vec::<u32>::new())
//!     .unwrap();
//! worker.post(|v| v.push(1));
//! // `_guard` quiesces every registered actor still alive when main returns.
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::actor::Actor;
use crate::config::ExitConfig;
use crate::runtime::{ActorId, Runtime};

/// What the exit registry needs from an actor, independent of its object type.
pub(crate) trait Quiesce: Send + Sync {
    fn id(&self) -> ActorId;
    fn quit(&self);
    fn wait(&self, timeout: Duration) -> bool;
    fn mark_hung(&self);
}

impl<T: 'static> Quiesce for Runtime<T> {
    fn id(&self) -> ActorId {
        self.shared().id()
    }

    fn quit(&self) {
        Runtime::quit(self)
    }

    fn wait(&self, timeout: Duration) -> bool {
        Runtime::wait(self, timeout)
    }

    fn mark_hung(&self) {
        self.shared().mark_hung()
    }
}

struct Entry {
    actor: ActorId,
    target: Weak<dyn Quiesce>,
}

struct Inner {
    config: ExitConfig,
    entries: Mutex<HashMap<u64, Entry>>,
    next_entry: AtomicU64,
    shut_down: AtomicBool,
}

impl Inner {
    fn remove(&self, entry: u64) {
        if let Some(removed) = self.entries.lock().remove(&entry) {
            debug!(actor = %removed.actor, "Actor finished, exit entry removed");
        }
    }
}

/// Outcome of [`ExitRegistry::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Live actors found when shutdown started.
    pub total: usize,
    /// Actors that reached `Finished` before the deadline.
    pub finished: usize,
    /// Actors still running when the deadline passed.
    pub timed_out: Vec<ActorId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Tracks actors that must be quiesced before the process exits.
#[derive(Clone)]
pub struct ExitRegistry {
    inner: Arc<Inner>,
}

impl ExitRegistry {
    pub fn new(config: ExitConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: Mutex::new(HashMap::new()),
                next_entry: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static ExitRegistry {
        static GLOBAL: OnceLock<ExitRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            debug!("Exit registry created");
            ExitRegistry::new(ExitConfig::default())
        })
    }

    pub fn config(&self) -> &ExitConfig {
        &self.inner.config
    }

    /// Adds a weak entry for `actor`. Registering the same actor again adds
    /// an independent entry; shutdown visits each actor once.
    pub fn register<T: 'static>(&self, actor: &Actor<T>) {
        if self.inner.shut_down.load(Ordering::Acquire) {
            warn!(actor = %actor.id(), "Actor registered after exit shutdown, it will not be quiesced");
        }
        let entry = self.inner.next_entry.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().insert(
            entry,
            Entry {
                actor: actor.id(),
                target: actor.downgrade(),
            },
        );
        debug!(actor = %actor.id(), entry, "Registered for exit cleanup");

        let registry = Arc::downgrade(&self.inner);
        actor.on_finished(move |_| {
            if let Some(inner) = registry.upgrade() {
                inner.remove(entry);
            }
        });
    }

    /// Number of entries, live or not yet pruned.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Quits every live registered actor and waits for them. Only the first
    /// call does any work; later calls return an empty report.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Exit shutdown already ran");
            return ShutdownReport::default();
        }

        let live: Vec<Arc<dyn Quiesce>> = {
            let mut entries = self.inner.entries.lock();
            let mut seen = HashSet::new();
            let live = entries
                .values()
                .filter_map(|entry| entry.target.upgrade())
                .filter(|actor| seen.insert(actor.id()))
                .collect();
            entries.clear();
            live
        };

        let mut report = ShutdownReport {
            total: live.len(),
            ..ShutdownReport::default()
        };
        if live.is_empty() {
            return report;
        }
        info!(count = live.len(), "Quitting actors before exit");

        for actor in &live {
            actor.quit();
        }

        let grace = self.inner.config.grace();
        let mut outstanding = Vec::new();
        for actor in live {
            if actor.wait(grace) {
                report.finished += 1;
            } else {
                outstanding.push(actor);
            }
        }

        let timeout = self.inner.config.timeout();
        let deadline = Instant::now().checked_add(timeout);
        for actor in outstanding {
            let remaining =
                deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
            if actor.wait(remaining) {
                report.finished += 1;
            } else {
                warn!(actor = %actor.id(), ?timeout, "Timeout: no quit from actor thread");
                actor.mark_hung();
                report.timed_out.push(actor.id());
            }
        }

        info!(
            finished = report.finished,
            timed_out = report.timed_out.len(),
            "Exit shutdown complete"
        );
        report
    }

    /// Guard that runs [`shutdown`](Self::shutdown) on this registry when
    /// dropped.
    pub fn guard(&self) -> ExitGuard {
        ExitGuard {
            registry: self.clone(),
        }
    }
}

impl Default for ExitRegistry {
    fn default() -> Self {
        Self::new(ExitConfig::default())
    }
}

/// Adds `actor` to the global registry.
pub fn register_for_exit_cleanup<T: 'static>(actor: &Actor<T>) {
    ExitRegistry::global().register(actor);
}

/// Returns a guard bound to the global registry. Keep it alive for the whole
/// of `main`; dropping it is the process "about to terminate" notification.
pub fn exit_guard() -> ExitGuard {
    ExitRegistry::global().guard()
}

/// Runs the registry shutdown when dropped.
#[must_use = "dropping the guard immediately shuts down registered actors"]
pub struct ExitGuard {
    registry: ExitRegistry,
}

impl ExitGuard {
    /// Runs the shutdown now and returns its report.
    pub fn shutdown(self) -> ShutdownReport {
        self.registry.shutdown()
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let report = self.registry.shutdown();
        if !report.is_clean() {
            warn!(
                timed_out = report.timed_out.len(),
                "Some actors were still running at exit"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tracing_test::traced_test;

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn entries_do_not_keep_actors_alive() {
        let registry = ExitRegistry::default();
        let actor = Actor::create_sync(|| 0u32).unwrap();
        registry.register(&actor);
        assert_eq!(actor.handle_count(), 1);
        assert_eq!(registry.len(), 1);

        drop(actor);
        let report = registry.shutdown();
        assert_eq!(report.total, 0);
    }

    #[test]
    fn finished_actor_removes_its_entry() {
        let registry = ExitRegistry::default();
        let actor = Actor::create_sync(|| 0u32).unwrap();
        registry.register(&actor);
        registry.register(&actor);
        assert_eq!(registry.len(), 2);

        assert!(actor.quit_sync(Duration::from_secs(5)));
        assert!(wait_until(Duration::from_secs(2), || registry.is_empty()));
    }

    #[test]
    fn duplicate_registration_is_visited_once() {
        let registry = ExitRegistry::default();
        let actor = Actor::create_sync(|| 0u32).unwrap();
        registry.register(&actor);
        registry.register(&actor);

        let report = registry.shutdown();
        assert_eq!(report.total, 1);
        assert_eq!(report.finished, 1);
        assert!(actor.is_finished());
    }

    #[test]
    fn shutdown_runs_once() {
        let registry = ExitRegistry::default();
        let actor = Actor::create_sync(|| 0u32).unwrap();
        registry.register(&actor);

        assert_eq!(registry.shutdown().finished, 1);
        assert!(registry.is_shut_down());
        assert_eq!(registry.shutdown(), ShutdownReport::default());
    }

    #[test]
    #[traced_test]
    fn hung_actor_is_reported_and_logged() {
        let registry = ExitRegistry::new(
            ExitConfig::default()
                .with_grace(Duration::from_millis(1))
                .with_timeout(Duration::from_millis(100)),
        );
        let actor = Actor::create_sync(|| ()).unwrap();
        let (release, blocked) = mpsc::channel::<()>();
        actor.post(move |_| {
            let _ = blocked.recv();
        });
        registry.register(&actor);

        let started = Instant::now();
        let report = registry.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.total, 1);
        assert_eq!(report.finished, 0);
        assert_eq!(report.timed_out, vec![actor.id()]);
        assert!(logs_contain("Timeout: no quit from actor thread"));

        release.send(()).unwrap();
        assert!(actor.wait(Duration::from_secs(5)));
    }

    #[test]
    fn guard_shuts_down_on_drop() {
        let registry = ExitRegistry::default();
        let actor = Actor::create_sync(|| 0u32).unwrap();
        registry.register(&actor);
        {
            let _guard = registry.guard();
        }
        assert!(actor.is_finished());
        assert!(registry.is_shut_down());
    }
}
