//! Actor and shutdown configuration.
//!
//! Both structs deserialize with `#[serde(default)]`, so a partial document
//! (or none at all) yields the stock values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_name() -> String {
    "pinned-actor".to_string()
}

fn default_drop_timeout_ms() -> u64 {
    10_000
}

fn default_grace_ms() -> u64 {
    5
}

fn default_exit_timeout_ms() -> u64 {
    10_000
}

/// Per-actor settings applied when the worker thread is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Name given to the worker OS thread.
    pub name: String,
    /// Worker stack size in bytes. `None` keeps the platform default.
    pub stack_size: Option<usize>,
    /// How long releasing the last handle of a running actor waits for it
    /// to finish.
    pub drop_timeout_ms: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            stack_size: None,
            drop_timeout_ms: default_drop_timeout_ms(),
        }
    }
}

impl ActorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn with_drop_timeout(mut self, timeout: Duration) -> Self {
        self.drop_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn drop_timeout(&self) -> Duration {
        Duration::from_millis(self.drop_timeout_ms)
    }
}

/// Settings for the two-phase shutdown run by the exit registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    /// Short wait used to collect actors that finish right after `quit`.
    pub grace_ms: u64,
    /// Shared deadline for every actor still running after the grace wait.
    pub timeout_ms: u64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            timeout_ms: default_exit_timeout_ms(),
        }
    }
}

impl ExitConfig {
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace_ms = saturating_millis(grace);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shutdown_policy() {
        let actor = ActorConfig::default();
        assert_eq!(actor.name, "pinned-actor");
        assert_eq!(actor.stack_size, None);
        assert_eq!(actor.drop_timeout(), Duration::from_secs(10));

        let exit = ExitConfig::default();
        assert_eq!(exit.grace(), Duration::from_millis(5));
        assert_eq!(exit.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_document_keeps_remaining_defaults() {
        let actor: ActorConfig = serde_json::from_str(r#"{ "name": "indexer" }"#).unwrap();
        assert_eq!(actor.name, "indexer");
        assert_eq!(actor.drop_timeout_ms, 10_000);

        let exit: ExitConfig = serde_json::from_str(r#"{ "timeout_ms": 250 }"#).unwrap();
        assert_eq!(exit.grace_ms, 5);
        assert_eq!(exit.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn builders_override_fields() {
        let actor = ActorConfig::default()
            .with_name("io")
            .with_stack_size(256 * 1024)
            .with_drop_timeout(Duration::from_millis(1500));
        assert_eq!(actor.name, "io");
        assert_eq!(actor.stack_size, Some(256 * 1024));
        assert_eq!(actor.drop_timeout_ms, 1500);

        let exit = ExitConfig::default()
            .with_grace(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(2));
        assert_eq!(exit.grace_ms, 1);
        assert_eq!(exit.timeout_ms, 2000);
    }

    #[test]
    fn oversized_durations_saturate() {
        let actor = ActorConfig::default().with_drop_timeout(Duration::MAX);
        assert_eq!(actor.drop_timeout_ms, u64::MAX);

        let exit = ExitConfig::default()
            .with_grace(Duration::MAX)
            .with_timeout(Duration::MAX);
        assert_eq!(exit.grace_ms, u64::MAX);
        assert_eq!(exit.timeout_ms, u64::MAX);
    }
}
