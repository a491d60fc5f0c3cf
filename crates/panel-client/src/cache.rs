//! Per-endpoint time-windowed response cache (§4.B).
//!
//! Single-threaded cooperative use only: a client owns one `TimeWindowCache`
//! and never shares it across tasks, so plain interior mutability (no lock)
//! is enough.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maps a text key to a value with an associated time of entry.
///
/// `window == Duration::ZERO` disables the cache entirely: `get` always
/// returns `None` and `put` is a no-op, matching the `cache_window_s == 0`
/// boundary behaviour.
#[derive(Debug)]
pub struct TimeWindowCache<V> {
    window: Duration,
    entries: RefCell<HashMap<String, (V, Instant)>>,
}

impl<V: Clone> TimeWindowCache<V> {
    pub fn new(window: Duration) -> Self {
        Self { window, entries: RefCell::new(HashMap::new()) }
    }

    /// Returns the cached value for `key` if it exists and is within the
    /// configured window of `now`.
    pub fn get(&self, key: &str) -> Option<V> {
        if self.window.is_zero() {
            return None;
        }
        let entries = self.entries.borrow();
        let (value, created_at) = entries.get(key)?;
        if created_at.elapsed() <= self.window {
            Some(value.clone())
        } else {
            None
        }
    }

    /// Stores `value` under `key` with `created_at = now`. No-op when the
    /// cache is disabled.
    pub fn put(&self, key: impl Into<String>, value: V) {
        if self.window.is_zero() {
            return;
        }
        self.entries.borrow_mut().insert(key.into(), (value, Instant::now()));
    }

    /// Drops every entry. Used by write operations, which invalidate the
    /// whole cache rather than just the key they touched (§4.D).
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Number of live entries, irrespective of window expiry. Exposed for
    /// tests that want to assert "no entry was ever written" without racing
    /// the window's elapsed-time check.
    #[cfg(test)]
    pub fn raw_len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
