//! Cleanup registry executed during finalization.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

struct CleanupEntry {
    name: String,
    action: CleanupFn,
}

/// Registry for async cleanup actions executed in LIFO order.
///
/// Stages register teardown work here (e.g. stopping the container they
/// started); the runner drains the registry during finalization on every exit
/// path.
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupRegistry {
    /// Creates a new cleanup registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named cleanup action.
    pub fn register<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.entries.lock().push(CleanupEntry {
            name: name.into(),
            action: Box::new(move || action().boxed()),
        });
    }

    /// Removes every action registered under `name`.
    ///
    /// Returns true if something was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() < before
    }

    /// Runs all cleanup actions in LIFO order.
    ///
    /// Each action gets an equal share of the total timeout. Failures, panics
    /// and timeouts are collected but don't stop other actions from running.
    /// The registry is empty afterwards.
    pub async fn run_all(&self, timeout: Duration) -> Vec<(String, String)> {
        let entries: Vec<CleanupEntry> = std::mem::take(&mut *self.entries.lock());
        if entries.is_empty() {
            return Vec::new();
        }

        let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        let per_action = (timeout / count).max(Duration::from_millis(10));
        let mut failures = Vec::new();

        for entry in entries.into_iter().rev() {
            let name = entry.name;
            let fut = std::panic::AssertUnwindSafe((entry.action)()).catch_unwind();

            match tokio::time::timeout(per_action, fut).await {
                Ok(Ok(Ok(()))) => debug!(cleanup = %name, "Cleanup completed"),
                Ok(Ok(Err(reason))) => {
                    warn!(cleanup = %name, "Cleanup failed: {}", reason);
                    failures.push((name, reason));
                }
                Ok(Err(_panic)) => {
                    let msg = "Cleanup action panicked".to_string();
                    warn!(cleanup = %name, "{}", msg);
                    failures.push((name, msg));
                }
                Err(_) => {
                    let msg = format!("Cleanup timed out after {per_action:?}");
                    warn!(cleanup = %name, "{}", msg);
                    failures.push((name, msg));
                }
            }
        }

        failures
    }

    /// Returns the number of pending cleanup actions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}
