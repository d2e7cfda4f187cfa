use moka::future::Cache;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

/// Upper bound on how long a finished value can linger if eviction is missed
const LINGER: Duration = Duration::from_secs(5);

/// Single-flight: concurrent callers for one key share one computation
///
/// Finished values are evicted as soon as the computing caller returns, so
/// this never acts as a cache. Whether a result is stored is up to the
/// caller.
pub struct InFlight<V> {
    calls: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> InFlight<V> {
    pub fn new() -> Self {
        Self {
            calls: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(LINGER)
                .build(),
        }
    }

    /// Run `compute` unless a computation for `key` is already under way,
    /// in which case wait for and return its value
    pub async fn run<F>(&self, key: &str, compute: F) -> V
    where
        F: Future<Output = V>,
    {
        let entry = self.calls.entry(key.to_string()).or_insert_with(compute).await;
        if entry.is_fresh() {
            self.calls.invalidate(key).await;
        } else {
            trace!(key, "Joined in-flight computation");
        }
        entry.into_value()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for InFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}
