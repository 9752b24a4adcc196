//! Ordered entry index (C3): insertion-ordered (uniform expiration) and
//! deadline-ordered (variable expiration) variants over the same contract.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use uuid::Uuid;

use super::entry::Entry;

/// The contract both index variants satisfy. Only asymptotic complexity
/// differs: O(1) for [`UniformIndex`], O(log n) for [`VariableIndex`].
///
/// Every method here is only ever called while the owning map's writer
/// (for mutating methods) or reader (for `get`/`contains_key`/`len`/
/// `snapshot`) lock is held, so none of these need their own
/// synchronization.
pub(crate) trait IndexOps<K, V>
where
    K: Eq + Hash + Clone,
{
    fn get(&self, key: &K) -> Option<Arc<Entry<K, V>>>;
    fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
    fn put(&mut self, key: K, entry: Arc<Entry<K, V>>);
    fn remove(&mut self, key: &K) -> Option<Arc<Entry<K, V>>>;
    /// The entry with the earliest deadline (uniform: oldest inserted
    /// survivor; variable: smallest `(expected_at, id)`).
    fn first(&self) -> Option<Arc<Entry<K, V>>>;
    /// Repositions `entry` after its deadline or insertion order changed.
    fn reorder(&mut self, entry: &Arc<Entry<K, V>>);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// A point-in-time copy of every entry, in index order.
    fn snapshot(&self) -> Vec<Arc<Entry<K, V>>>;
    fn clear(&mut self);
}

struct Slot<K, V> {
    entry: Arc<Entry<K, V>>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Insertion-ordered index backed by an arena (`Vec<Option<Slot>>` plus a
/// free list) instead of raw intrusive pointers: the owning engine's
/// single coarse lock already rules out concurrent structural access, so
/// there is nothing for `unsafe` pointer juggling to buy here.
pub(crate) struct UniformIndex<K, V, S = RandomState> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    by_key: HashMap<K, usize, S>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<K, V, S: Default> Default for UniformIndex<K, V, S> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::default(),
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl<K, V, S> UniformIndex<K, V, S> {
    /// Builds an empty index using a caller-supplied hasher, for hashers
    /// that don't implement `Default` (e.g. a seeded `RandomState`).
    pub(crate) fn with_hasher(hasher: S) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::with_hasher(hasher),
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl<K, V, S> UniformIndex<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    fn alloc(&mut self, entry: Arc<Entry<K, V>>) -> usize {
        let slot = Slot {
            entry,
            prev: None,
            next: None,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    /// Detaches `idx` from the linked list, leaving the slot allocated.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().expect("unlinked a free slot");
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(t) = old_tail {
            self.slots[t].as_mut().unwrap().next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = old_tail;
            slot.next = None;
        }
        self.tail = Some(idx);
    }
}

impl<K, V, S> IndexOps<K, V> for UniformIndex<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    fn get(&self, key: &K) -> Option<Arc<Entry<K, V>>> {
        self.by_key
            .get(key)
            .and_then(|&idx| self.slots[idx].as_ref())
            .map(|slot| Arc::clone(&slot.entry))
    }

    fn put(&mut self, key: K, entry: Arc<Entry<K, V>>) {
        let idx = self.alloc(entry);
        self.push_back(idx);
        self.by_key.insert(key, idx);
        self.len += 1;
    }

    fn remove(&mut self, key: &K) -> Option<Arc<Entry<K, V>>> {
        let idx = self.by_key.remove(key)?;
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("double free of slot");
        self.free.push(idx);
        self.len -= 1;
        Some(slot.entry)
    }

    fn first(&self) -> Option<Arc<Entry<K, V>>> {
        self.head
            .and_then(|idx| self.slots[idx].as_ref())
            .map(|slot| Arc::clone(&slot.entry))
    }

    fn reorder(&mut self, entry: &Arc<Entry<K, V>>) {
        if let Some(&idx) = self.by_key.get(&entry.key) {
            self.unlink(idx);
            self.push_back(idx);
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn snapshot(&self) -> Vec<Arc<Entry<K, V>>> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.slots[idx].as_ref().expect("dangling link");
            out.push(Arc::clone(&slot.entry));
            cur = slot.next;
        }
        out
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_key.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }
}

/// Orders entries by `(expected_at, id)`. `id` is the entry's `Uuid`
/// (assigned once at construction) and exists purely to break ties between
/// entries with an identical deadline — see spec invariant 3.
struct DeadlineKey<K, V> {
    expected_at: i64,
    id: Uuid,
    entry: Arc<Entry<K, V>>,
}

impl<K, V> PartialEq for DeadlineKey<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.expected_at == other.expected_at && self.id == other.id
    }
}
impl<K, V> Eq for DeadlineKey<K, V> {}

impl<K, V> PartialOrd for DeadlineKey<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K, V> Ord for DeadlineKey<K, V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.expected_at, self.id).cmp(&(other.expected_at, other.id))
    }
}

/// Deadline-ordered index for variable (per-entry) expiration.
pub(crate) struct VariableIndex<K, V, S = RandomState> {
    order: BTreeSet<DeadlineKey<K, V>>,
    // Tracks the `expected_at` each key was last inserted into `order`
    // under, so `reorder` can remove the stale ordering key even after the
    // entry's own `expected_at` has already been updated in place.
    by_key: HashMap<K, (i64, Arc<Entry<K, V>>), S>,
}

impl<K, V, S: Default> Default for VariableIndex<K, V, S> {
    fn default() -> Self {
        Self {
            order: BTreeSet::new(),
            by_key: HashMap::default(),
        }
    }
}

impl<K, V, S> VariableIndex<K, V, S> {
    /// Builds an empty index using a caller-supplied hasher, for hashers
    /// that don't implement `Default`.
    pub(crate) fn with_hasher(hasher: S) -> Self {
        Self {
            order: BTreeSet::new(),
            by_key: HashMap::with_hasher(hasher),
        }
    }
}

impl<K, V, S> IndexOps<K, V> for VariableIndex<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    fn get(&self, key: &K) -> Option<Arc<Entry<K, V>>> {
        self.by_key.get(key).map(|(_, e)| Arc::clone(e))
    }

    fn put(&mut self, key: K, entry: Arc<Entry<K, V>>) {
        let at = entry.expected_at();
        self.order.insert(DeadlineKey {
            expected_at: at,
            id: entry.id,
            entry: Arc::clone(&entry),
        });
        self.by_key.insert(key, (at, entry));
    }

    fn remove(&mut self, key: &K) -> Option<Arc<Entry<K, V>>> {
        let (at, entry) = self.by_key.remove(key)?;
        self.order.remove(&DeadlineKey {
            expected_at: at,
            id: entry.id,
            entry: Arc::clone(&entry),
        });
        Some(entry)
    }

    fn first(&self) -> Option<Arc<Entry<K, V>>> {
        self.order.iter().next().map(|dk| Arc::clone(&dk.entry))
    }

    fn reorder(&mut self, entry: &Arc<Entry<K, V>>) {
        let key = &entry.key;
        let old_at = match self.by_key.get(key) {
            Some((at, _)) => *at,
            None => return,
        };
        self.order.remove(&DeadlineKey {
            expected_at: old_at,
            id: entry.id,
            entry: Arc::clone(entry),
        });
        let new_at = entry.expected_at();
        self.order.insert(DeadlineKey {
            expected_at: new_at,
            id: entry.id,
            entry: Arc::clone(entry),
        });
        self.by_key.insert(key.clone(), (new_at, Arc::clone(entry)));
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }

    fn snapshot(&self) -> Vec<Arc<Entry<K, V>>> {
        self.order.iter().map(|dk| Arc::clone(&dk.entry)).collect()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entry::{DurationCell, ExpirationPolicy, PolicyCell};
    use crate::common::time::{Clock, MockClock};

    fn make_entry(key: &'static str, clock: &Clock) -> Arc<Entry<&'static str, i32>> {
        Arc::new(Entry::new(
            key,
            Arc::new(1),
            PolicyCell::new(ExpirationPolicy::Created),
            DurationCell::new(100),
            clock,
        ))
    }

    #[test]
    fn uniform_first_is_insertion_order() {
        let clock = Clock::from_ticker(MockClock::new());
        let mut idx: UniformIndex<&str, i32> = UniformIndex::default();
        idx.put("a", make_entry("a", &clock));
        idx.put("b", make_entry("b", &clock));
        assert_eq!(idx.first().unwrap().key, "a");
        idx.reorder(&idx.get(&"a").unwrap());
        assert_eq!(idx.first().unwrap().key, "b");
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn uniform_remove_updates_head() {
        let clock = Clock::from_ticker(MockClock::new());
        let mut idx: UniformIndex<&str, i32> = UniformIndex::default();
        idx.put("a", make_entry("a", &clock));
        idx.put("b", make_entry("b", &clock));
        idx.remove(&"a");
        assert_eq!(idx.first().unwrap().key, "b");
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn variable_orders_by_deadline() {
        let mock = MockClock::new();
        let clock = Clock::from_ticker(mock.clone());
        let mut idx: VariableIndex<&str, i32> = VariableIndex::default();
        let a = Arc::new(Entry::new(
            "a",
            Arc::new(1),
            PolicyCell::new(ExpirationPolicy::Created),
            DurationCell::new(200),
            &clock,
        ));
        let b = Arc::new(Entry::new(
            "b",
            Arc::new(1),
            PolicyCell::new(ExpirationPolicy::Created),
            DurationCell::new(100),
            &clock,
        ));
        idx.put("a", Arc::clone(&a));
        idx.put("b", Arc::clone(&b));
        assert_eq!(idx.first().unwrap().key, "b");

        // Reorder "b" further out; "a" should become first.
        b.set_duration_nanos(300);
        b.reset_deadline(&clock);
        idx.reorder(&b);
        assert_eq!(idx.first().unwrap().key, "a");
    }
}
