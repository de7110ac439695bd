//! # Observability & Tracing
//!
//! Every lifecycle transition of an actor is logged through the `tracing`
//! crate with the actor's id as a structured field:
//!
//! - **info**: worker started, worker finished, exit registry shutdown
//! - **debug**: quit requests, discarded events, handle release
//! - **trace**: per-event dispatch
//! - **warn**: timed-out waits during shutdown or handle release
//! - **error**: factory faults, handler panics, finished-callback panics
//!
//! [`setup_tracing`] installs a compact fmt subscriber filtered by `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=info cargo run -p actor-demo
//! RUST_LOG=pinned_actor=debug cargo run -p actor-demo
//! ```
//!
//! ```text
//! INFO Actor started actor=actor-1 thread="counter"
//! DEBUG Quit requested actor=actor-1
//! INFO Actor finished actor=actor-1 discarded=0
//! ```

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes the global subscriber. Panics if one is already installed.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .compact()
        .init();
}

/// Like [`setup_tracing`], but returns `false` instead of panicking when a
/// global subscriber is already set.
pub fn try_setup_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}
