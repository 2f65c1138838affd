use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
enum TimedCacheState<T>
where
    T: Clone,
{
    Cached((Instant, T)),
    None,
}

/// Keeps the last fetched value for `duration`. Concurrent callers share one fetch.
#[derive(Clone)]
pub struct AsyncTimedCache<T: Clone> {
    state: Arc<Mutex<TimedCacheState<T>>>,
    duration: Duration,
}

impl<T: Clone> AsyncTimedCache<T> {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimedCacheState::None)),
            duration,
        }
    }

    /// Returns the cached value, or runs `fetch` when it is missing or stale.
    ///
    /// A failed fetch leaves the cache empty so the next caller retries.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state_guard = self.state.lock().await;
        match &*state_guard {
            TimedCacheState::Cached((last_modified, value))
                if last_modified.elapsed() < self.duration =>
            {
                Ok(value.clone())
            }
            _ => {
                let value = fetch().await?;
                *state_guard = TimedCacheState::Cached((Instant::now(), value.clone()));
                Ok(value)
            }
        }
    }
}
