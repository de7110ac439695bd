//! Uses the process-wide registry, so it lives in its own test binary.

use pinned_actor::{exit_guard, register_for_exit_cleanup, Actor, Builder, ExitRegistry};
use std::time::Duration;

#[test]
fn global_guard_quiesces_registered_actors() {
    let guard = exit_guard();

    let builder_registered = Builder::new()
        .name("cleanup-builder")
        .exit_cleanup(true)
        .create_sync(|| 0u32)
        .unwrap();
    let manually_registered = Actor::create_sync(String::new).unwrap();
    register_for_exit_cleanup(&manually_registered);
    let unregistered = Actor::create_sync(|| ()).unwrap();

    assert_eq!(ExitRegistry::global().len(), 2);
    builder_registered.post(|n| *n += 1);

    let report = guard.shutdown();
    assert!(report.is_clean());
    assert_eq!(report.finished, 2);
    assert!(builder_registered.is_finished());
    assert!(manually_registered.is_finished());
    assert!(!unregistered.is_finished());
    assert!(ExitRegistry::global().is_shut_down());

    assert!(unregistered.quit_sync(Duration::from_secs(5)));
}
