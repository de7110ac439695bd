//! # Pinned Actor
//!
//! > **Objects pinned to their own thread, driven by messages.**
//!
//! This crate runs each managed object on a dedicated worker thread for its
//! entire life. The object is built *on* that thread by a caller-supplied
//! factory, receives work as closures posted into the thread's event loop, and
//! is dropped on the same thread when the actor stops.
//!
//! ## Core Concepts
//!
//! - **[`Actor<T>`]**: reference-counted handle. Clone it, send it, drop it
//!   anywhere; the worker only stops when asked to or when the last handle goes.
//! - **[`Event<T>`]**: a closure run against `&mut T` on the worker thread.
//! - **Creation handshake**: [`Actor::create`] returns at once and calls back
//!   from the worker when the object exists; [`Actor::create_sync`] blocks for
//!   the same notification. A failing factory is reported as
//!   [`ActorError::CreationFailed`].
//! - **[`ExitRegistry`]**: weak, process-wide list of actors that must be
//!   quiesced before exit, driven by an [`ExitGuard`].
//!
//! ## Quick Start
//!
//! ```rust
//! use pinned_actor::{exit_guard, Builder, Event};
//! use std::time::Duration;
//!
//! struct Tally {
//!     seen: Vec<String>,
//!     owner: std::thread::ThreadId,
//! }
//!
//! let _guard = exit_guard();
//!
//! let tally = Builder::new()
//!     .name("tally")
//!     .exit_cleanup(true)
//!     .create_sync(|| Tally {
//!         seen: Vec::new(),
//!         owner: std::thread::current().id(),
//!     })
//!     .unwrap();
//!
//! tally.post_event(Event::new(|t: &mut Tally| t.seen.push("hello".into())));
//! let (count, owner) = tally
//!     .request_blocking(|t: &mut Tally| (t.seen.len(), t.owner))
//!     .unwrap();
//! assert_eq!(count, 1);
//! assert_ne!(owner, std::thread::current().id());
//!
//! assert!(tally.quit_sync(Duration::from_secs(5)));
//! ```
//!
//! ## Concurrency Model
//!
//! - One OS thread per actor, no pool and no work stealing
//! - Events from one sender are handled in the order they were posted
//! - The ready notification happens before the first event is handled
//! - `quit` is cooperative: the running handler finishes, queued events before
//!   the quit are handled, later ones are discarded
//! - Timeouts come back as `false` and are logged, never escalated
//!
//! ## Observability
//!
//! Lifecycle transitions are logged with `tracing`. See [`logging`] for the
//! subscriber setup used by binaries.

pub mod actor;
pub mod config;
pub mod error;
pub mod event;
pub mod exit;
pub mod logging;

mod handshake;
mod notify;
mod runtime;

pub use actor::{Actor, Builder};
pub use config::{ActorConfig, ExitConfig};
pub use error::{ActorError, BoxError, Result};
pub use event::Event;
pub use exit::{exit_guard, register_for_exit_cleanup, ExitGuard, ExitRegistry, ShutdownReport};
pub use logging::{setup_tracing, try_setup_tracing};
pub use runtime::{ActorId, RunState};
