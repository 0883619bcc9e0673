//! Keyed debouncing.
//!
//! [`Debouncer`] coalesces triggers per key: every trigger restarts that
//! key's window, and a key comes due once its window elapses with no
//! further trigger. The latest value supplied for a key wins.
//!
//! The debouncer holds deadlines only; the owner sleeps until
//! [`Debouncer::next_deadline`] and then calls [`Debouncer::take_due`].

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Debouncer<K, V> {
    window: Duration,
    pending: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash + Clone, V> Debouncer<K, V> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record a trigger for `key` at `now`, restarting its window.
    pub fn trigger(&mut self, key: K, value: V, now: Instant) {
        self.pending.insert(key, (now + self.window, value));
    }

    /// Earliest deadline among pending keys.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(deadline, _)| *deadline).min()
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let mut due: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.sort_by_key(|key| self.pending[key].0);

        due.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|(_, value)| (key, value)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
