//! Key/value/entry iterator views (§4.3, §5 "Iteration", DESIGN NOTES'
//! "inner classes and iterator holder classes" migration note).
//!
//! Each iterator snapshots the index's contents and length at creation
//! time. On every `next()` call it re-checks the map's current length; a
//! mismatch means the map was structurally modified (by another thread, or
//! by time-based expiration) since the snapshot was taken, which spec.md
//! §5 requires to fail fast. Rust iterators have no checked-exception
//! channel, so the failure is a panic — the direct analogue of the
//! source's fail-fast `ConcurrentModificationException`.

use std::sync::Arc;

use crate::common::entry::Entry;
use crate::common::error::Error;

type LenFn = Arc<dyn Fn() -> usize + Send + Sync>;

fn check_len(expected: usize, current_len: &LenFn) {
    if current_len() != expected {
        panic!("{}", Error::ConcurrentModification);
    }
}

/// Iterates over a map's keys in index order.
pub struct KeyIter<K, V> {
    snapshot: std::vec::IntoIter<Arc<Entry<K, V>>>,
    expected_len: usize,
    current_len: LenFn,
}

impl<K, V> KeyIter<K, V> {
    pub(crate) fn new(snapshot: Vec<Arc<Entry<K, V>>>, expected_len: usize, current_len: LenFn) -> Self {
        Self {
            snapshot: snapshot.into_iter(),
            expected_len,
            current_len,
        }
    }
}

impl<K: Clone, V> Iterator for KeyIter<K, V> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        check_len(self.expected_len, &self.current_len);
        self.snapshot.next().map(|e| e.key.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.snapshot.size_hint()
    }
}

/// Iterates over a map's values in index order.
pub struct ValueIter<K, V> {
    snapshot: std::vec::IntoIter<Arc<Entry<K, V>>>,
    expected_len: usize,
    current_len: LenFn,
}

impl<K, V> ValueIter<K, V> {
    pub(crate) fn new(snapshot: Vec<Arc<Entry<K, V>>>, expected_len: usize, current_len: LenFn) -> Self {
        Self {
            snapshot: snapshot.into_iter(),
            expected_len,
            current_len,
        }
    }
}

impl<K, V> Iterator for ValueIter<K, V> {
    type Item = Arc<V>;

    fn next(&mut self) -> Option<Arc<V>> {
        check_len(self.expected_len, &self.current_len);
        self.snapshot.next().map(|e| e.value())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.snapshot.size_hint()
    }
}

/// Iterates over a map's key/value pairs in index order.
pub struct EntryIter<K, V> {
    snapshot: std::vec::IntoIter<Arc<Entry<K, V>>>,
    expected_len: usize,
    current_len: LenFn,
}

impl<K, V> EntryIter<K, V> {
    pub(crate) fn new(snapshot: Vec<Arc<Entry<K, V>>>, expected_len: usize, current_len: LenFn) -> Self {
        Self {
            snapshot: snapshot.into_iter(),
            expected_len,
            current_len,
        }
    }
}

impl<K: Clone, V> Iterator for EntryIter<K, V> {
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<(K, Arc<V>)> {
        check_len(self.expected_len, &self.current_len);
        self.snapshot.next().map(|e| (e.key.clone(), e.value()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.snapshot.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_snapshot_in_order_when_untouched() {
        use crate::common::entry::{DurationCell, ExpirationPolicy, PolicyCell};
        use crate::common::time::{Clock, MockClock};

        let clock = Clock::from_ticker(MockClock::new());
        let a = Arc::new(Entry::new(
            "a",
            Arc::new(1),
            PolicyCell::new(ExpirationPolicy::Created),
            DurationCell::new(100),
            &clock,
        ));
        let b = Arc::new(Entry::new(
            "b",
            Arc::new(2),
            PolicyCell::new(ExpirationPolicy::Created),
            DurationCell::new(100),
            &clock,
        ));
        let snapshot = vec![a, b];
        let len: LenFn = Arc::new(|| 2);
        let mut iter = KeyIter::new(snapshot, 2, len);
        assert_eq!(iter.next(), Some("a"));
        assert_eq!(iter.next(), Some("b"));
        assert_eq!(iter.next(), None);
    }

    #[test]
    #[should_panic(expected = "modified during iteration")]
    fn panics_on_concurrent_modification() {
        let snapshot: Vec<Arc<Entry<&str, i32>>> = Vec::new();
        let len: LenFn = Arc::new(|| 1);
        let mut iter: KeyIter<&str, i32> = KeyIter::new(snapshot, 0, len);
        iter.next();
    }
}
