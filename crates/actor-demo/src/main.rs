//! # Pinned Actor Demo
//!
//! Runs a thread-bound word index next to async code:
//!
//! 1. Builds the index on its own worker thread. The index holds an `Rc`,
//!    so it could never be moved between threads.
//! 2. Feeds it lines with fire-and-forget posts.
//! 3. Queries it with async requests.
//! 4. Leaves shutdown to the exit guard.
//!
//! An optional first argument points at a JSON [`ActorConfig`] file:
//!
//! ```bash
//! RUST_LOG=debug cargo run -p actor-demo -- demo.json
//! ```

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use pinned_actor::{exit_guard, setup_tracing, ActorConfig, Builder};
use tracing::{info, Instrument};

/// Word counts keyed by interned words. `Rc` keeps it on one thread.
#[derive(Default)]
struct WordIndex {
    words: HashMap<Rc<str>, usize>,
    lines: usize,
}

impl WordIndex {
    fn add_line(&mut self, line: &str) {
        self.lines += 1;
        for word in line.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if word.is_empty() {
                continue;
            }
            *self.words.entry(Rc::from(word)).or_insert(0) += 1;
        }
    }

    fn top(&self, n: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<_> = self
            .words
            .iter()
            .map(|(word, count)| (word.to_string(), *count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }
}

fn load_config() -> Result<ActorConfig, String> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(ActorConfig::default().with_name("word-index"));
    };
    let text = std::fs::read_to_string(&path).map_err(|e| format!("{path}: {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("{path}: {e}"))
}

const TEXT: &[&str] = &[
    "One thread per object, one object per thread.",
    "The object is built on its thread and dropped on its thread.",
    "Messages reach the object in the order they were posted.",
];

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();
    let _guard = exit_guard();

    let config = load_config()?;
    info!(name = %config.name, "Starting word index actor");

    let index = Builder::with_config(config)
        .exit_cleanup(true)
        .create_async(WordIndex::default)
        .await
        .map_err(|e| e.to_string())?;

    for line in TEXT {
        index.post(move |idx| idx.add_line(line));
    }

    let span = tracing::info_span!("query", actor = %index.id());
    let (lines, top) = async {
        let lines = index.request(|idx| idx.lines).await?;
        let top = index.request(|idx| idx.top(3)).await?;
        Ok::<_, pinned_actor::ActorError>((lines, top))
    }
    .instrument(span)
    .await
    .map_err(|e| e.to_string())?;

    info!(lines, "Lines indexed");
    for (word, count) in top {
        info!(%word, count, "Top word");
    }

    let worker = index.clone();
    let stopped = tokio::task::spawn_blocking(move || worker.quit_sync(Duration::from_secs(5)))
        .await
        .map_err(|e| e.to_string())?;
    index.finished().await;

    info!(stopped, "Demo completed");
    Ok(())
}
