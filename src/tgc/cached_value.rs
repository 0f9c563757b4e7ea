//! Time-limited memoisation of a single value

use super::clock::Clock;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

struct Inner<T> {
    value: Option<T>,
    timestamp: i64,
}

/// Time based cache for a single value.
///
/// A value older than `max_age_secs` is refreshed on the next call to
/// [`CachedValue::get`]. A `max_age_secs` of zero means every call
/// refreshes. The refresh future runs outside the internal lock, so two
/// concurrent callers may both refresh; the last writer wins, which is
/// harmless for the idempotent getters cached here.
pub struct CachedValue<T> {
    inner: Mutex<Inner<T>>,
    max_age_secs: i64,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> CachedValue<T> {
    /// Create an empty cache
    pub fn new(max_age_secs: i64, clock: Arc<dyn Clock>) -> Self {
        let timestamp = clock.now_secs();
        Self {
            inner: Mutex::new(Inner {
                value: None,
                timestamp,
            }),
            max_age_secs,
            clock,
        }
    }

    /// Return the cached value, refreshing it through `refresh` if it has
    /// never been set or its age has reached the maximum
    pub async fn get<F, Fut>(&self, refresh: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let now = self.clock.now_secs();

        {
            let inner = self.inner.lock();
            if let Some(ref value) = inner.value {
                if now - inner.timestamp < self.max_age_secs {
                    return value.clone();
                }
            }
        }

        let value = refresh().await;

        let mut inner = self.inner.lock();
        inner.value = Some(value.clone());
        inner.timestamp = now;
        value
    }
}

// =============================================================================
// Tests
// =============================================================================
