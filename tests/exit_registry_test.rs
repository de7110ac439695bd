use pinned_actor::{Actor, Builder, ExitConfig, ExitRegistry, RunState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

struct Worker {
    handled: Arc<AtomicUsize>,
}

fn spawn_workers(count: usize, handled: &Arc<AtomicUsize>) -> Vec<Actor<Worker>> {
    (0..count)
        .map(|i| {
            let handled = Arc::clone(handled);
            Builder::new()
                .name(format!("worker-{i}"))
                .create_sync(move || Worker { handled })
                .expect("Failed to create worker")
        })
        .collect()
}

#[test]
fn shutdown_quiesces_every_registered_actor() {
    let registry = ExitRegistry::default();
    let handled = Arc::new(AtomicUsize::new(0));
    let workers = spawn_workers(8, &handled);

    for worker in &workers {
        registry.register(worker);
        for _ in 0..10 {
            worker.post(|w| {
                w.handled.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    let report = registry.shutdown();
    assert!(report.is_clean());
    assert_eq!(report.total, 8);
    assert_eq!(report.finished, 8);
    assert_eq!(handled.load(Ordering::SeqCst), 80, "Events queued before quit are handled");
    assert!(workers.iter().all(|w| w.state() == RunState::Finished));
}

#[test]
fn dropped_actors_are_skipped_at_shutdown() {
    let registry = ExitRegistry::default();
    let handled = Arc::new(AtomicUsize::new(0));
    let mut workers = spawn_workers(4, &handled);
    for worker in &workers {
        registry.register(worker);
    }

    workers.truncate(1);
    let report = registry.shutdown();
    assert_eq!(report.total, 1);
    assert_eq!(report.finished, 1);
}

#[test]
fn deadline_is_shared_across_hung_actors() {
    let registry = ExitRegistry::new(
        ExitConfig::default()
            .with_grace(Duration::from_millis(1))
            .with_timeout(Duration::from_millis(200)),
    );

    let mut releases = Vec::new();
    let mut hung = Vec::new();
    for _ in 0..3 {
        let actor = Actor::create_sync(|| ()).unwrap();
        let (release, blocked) = mpsc::channel::<()>();
        actor.post(move |_| {
            let _ = blocked.recv();
        });
        registry.register(&actor);
        releases.push(release);
        hung.push(actor);
    }

    let started = Instant::now();
    let report = registry.shutdown();
    let elapsed = started.elapsed();

    assert_eq!(report.timed_out.len(), 3);
    assert!(elapsed < Duration::from_millis(200 * 3), "took {elapsed:?}");

    // Hung actors do not block their last handle a second time.
    let dropping = Instant::now();
    drop(hung);
    assert!(dropping.elapsed() < Duration::from_secs(1));

    for release in releases {
        let _ = release.send(());
    }
}
