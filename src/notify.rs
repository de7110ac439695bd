//! Background delivery of finished callbacks.
//!
//! Callbacks never run on the stack of the worker that just finished; they are
//! handed to a small process-wide runtime so that a callback releasing the last
//! handle, or touching the exit registry, cannot re-enter the teardown path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use tracing::{error, warn};

use crate::error::panic_message;
use crate::runtime::ActorId;

/// Callback fired once an actor reaches `Finished`.
pub(crate) type FinishedCallback = Box<dyn FnOnce(ActorId) + Send>;

fn notifier() -> Option<&'static tokio::runtime::Runtime> {
    static NOTIFIER: OnceLock<Option<tokio::runtime::Runtime>> = OnceLock::new();
    NOTIFIER
        .get_or_init(|| {
            match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("pinned-actor-notify")
                .enable_all()
                .build()
            {
                Ok(rt) => Some(rt),
                Err(e) => {
                    warn!(error = %e, "Notifier runtime unavailable, callbacks run inline");
                    None
                }
            }
        })
        .as_ref()
}

/// Queues `callbacks` for `id` on the notifier.
pub(crate) fn dispatch(id: ActorId, callbacks: Vec<FinishedCallback>) {
    if callbacks.is_empty() {
        return;
    }
    match notifier() {
        Some(rt) => {
            rt.spawn_blocking(move || run_callbacks(id, callbacks));
        }
        None => run_callbacks(id, callbacks),
    }
}

fn run_callbacks(id: ActorId, callbacks: Vec<FinishedCallback>) {
    for callback in callbacks {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(id))) {
            error!(actor = %id, panic = %panic_message(&*payload), "Finished callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn callbacks_run_off_the_calling_thread() {
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        let id = ActorId::next();
        dispatch(
            id,
            vec![Box::new(move |seen| {
                let _ = tx.send((seen, std::thread::current().id()));
            })],
        );
        let (seen, thread) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen, id);
        assert_ne!(thread, caller);
    }

    #[test]
    fn panicking_callback_does_not_stop_the_rest() {
        let (tx, rx) = mpsc::channel();
        dispatch(
            ActorId::next(),
            vec![
                Box::new(|_| panic!("listener bug")),
                Box::new(move |_| {
                    let _ = tx.send(());
                }),
            ],
        );
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
