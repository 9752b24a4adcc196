//! Expiration engine (C6): `ExpiringMap<K, V, S>`, coordinating the entry
//! record (C2), the ordered index (C3), the scheduler (C4) and the
//! listener dispatcher (C5) under one `parking_lot::RwLock`.
//!
//! Grounded on `moka::sync::Cache<K, V, S>` / `Inner<K, V, S>`'s outer
//! `Arc`-wrapped handle + private `Inner` split, and on its
//! `ValueEntry`-equality-checked update path for the CREATED-policy
//! idempotent-put rule (spec.md invariant 6). Unlike the teacher, the
//! backing store here is a single coarse `parking_lot::RwLock` over a
//! plain index (no lock-free segmented hash table): spec.md §9 explicitly
//! calls for keeping this lock coarse.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::common::entry::{DurationCell, Entry, ExpirationPolicy, PolicyCell};
use crate::common::error::Error;
use crate::common::index::{IndexOps, UniformIndex, VariableIndex};
use crate::common::listener::{Dispatcher, ExpirationListener, ListenerId};
use crate::common::scheduler::scheduler;
use crate::common::time::Clock;

use super::builder::{EntryLoader, ExpiringEntryLoader};
use super::iter::{EntryIter, KeyIter, ValueIter};

/// A read-only snapshot of a map's current configuration, grounded on the
/// `Policy` struct of the `arcstur-moka` example in this crate's retrieval
/// pack.
#[derive(Clone, Debug)]
pub struct Policy {
    pub max_size: Option<usize>,
    pub expiration_policy: ExpirationPolicy,
    pub time_to_live: Duration,
    pub variable: bool,
}

/// Either index variant from §4.3, behind one type so `State` doesn't need
/// to be generic over which one is active.
enum IndexImpl<K, V, S> {
    Uniform(UniformIndex<K, V, S>),
    Variable(VariableIndex<K, V, S>),
}

impl<K, V, S> IndexOps<K, V> for IndexImpl<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    fn get(&self, key: &K) -> Option<Arc<Entry<K, V>>> {
        match self {
            IndexImpl::Uniform(i) => i.get(key),
            IndexImpl::Variable(i) => i.get(key),
        }
    }

    fn put(&mut self, key: K, entry: Arc<Entry<K, V>>) {
        match self {
            IndexImpl::Uniform(i) => i.put(key, entry),
            IndexImpl::Variable(i) => i.put(key, entry),
        }
    }

    fn remove(&mut self, key: &K) -> Option<Arc<Entry<K, V>>> {
        match self {
            IndexImpl::Uniform(i) => i.remove(key),
            IndexImpl::Variable(i) => i.remove(key),
        }
    }

    fn first(&self) -> Option<Arc<Entry<K, V>>> {
        match self {
            IndexImpl::Uniform(i) => i.first(),
            IndexImpl::Variable(i) => i.first(),
        }
    }

    fn reorder(&mut self, entry: &Arc<Entry<K, V>>) {
        match self {
            IndexImpl::Uniform(i) => i.reorder(entry),
            IndexImpl::Variable(i) => i.reorder(entry),
        }
    }

    fn len(&self) -> usize {
        match self {
            IndexImpl::Uniform(i) => i.len(),
            IndexImpl::Variable(i) => i.len(),
        }
    }

    fn snapshot(&self) -> Vec<Arc<Entry<K, V>>> {
        match self {
            IndexImpl::Uniform(i) => i.snapshot(),
            IndexImpl::Variable(i) => i.snapshot(),
        }
    }

    fn clear(&mut self) {
        match self {
            IndexImpl::Uniform(i) => i.clear(),
            IndexImpl::Variable(i) => i.clear(),
        }
    }
}

/// Everything protected by the map's single reader/writer lock (§5
/// "Synchronization").
struct State<K, V, S> {
    index: IndexImpl<K, V, S>,
    uniform_policy: PolicyCell,
    uniform_duration: DurationCell,
    variable: bool,
    max_size: Option<usize>,
}

struct Inner<K, V, S> {
    state: RwLock<State<K, V, S>>,
    dispatcher: Dispatcher<K, V>,
    clock: Clock,
    entry_loader: Option<EntryLoader<K, V>>,
    expiring_entry_loader: Option<ExpiringEntryLoader<K, V>>,
}

impl<K, V, S> Inner<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// §4.6.11 scheduler arming. Arming an already-scheduled head is a
    /// no-op.
    fn arm_head(inner: &Arc<Self>, state: &mut State<K, V, S>) {
        let head = match state.index.first() {
            Some(head) => head,
            None => return,
        };
        if head.is_scheduled() {
            return;
        }
        let now = inner.clock.now_nanos();
        let delay_ns = (head.expected_at() - now).max(0) as u64;
        let task_inner = Arc::clone(inner);
        let handle = scheduler().execute_after(Duration::from_nanos(delay_ns), move || {
            Inner::run_expiration_task(&task_inner);
        });
        head.attach_schedule(handle);
    }

    /// §4.6.10, the internal `reset_entry` shared by every mutation path
    /// that changes an entry's deadline.
    fn reset_entry(inner: &Arc<Self>, state: &mut State<K, V, S>, entry: &Arc<Entry<K, V>>, schedule_first: bool) {
        let was_scheduled = entry.cancel(true, &inner.clock);
        state.index.reorder(entry);
        if was_scheduled || schedule_first {
            Self::arm_head(inner, state);
        }
    }

    /// §4.6.1's `max_size` enforcement: evicts the head repeatedly under
    /// the writer lock, collecting evicted entries for post-lock
    /// notification (same "collect then notify outside the lock" shape
    /// the scheduler's own expiration task uses).
    fn enforce_max_size(state: &mut State<K, V, S>, clock: &Clock, collected: &mut Vec<(K, Arc<V>)>) {
        let max = match state.max_size {
            Some(max) => max,
            None => return,
        };
        while state.index.len() > max {
            let head = match state.index.first() {
                Some(head) => head,
                None => break,
            };
            head.cancel(false, clock);
            state.index.remove(&head.key);
            collected.push((head.key.clone(), head.value()));
        }
    }

    fn dispatch_all(&self, collected: Vec<(K, Arc<V>)>) {
        for (key, value) in collected {
            self.dispatcher.dispatch(key, value);
        }
    }

    /// §4.4's expiration task. Acquires the writer lock, drains every
    /// entry whose deadline has already passed, arms the scheduler for
    /// whatever is now the head, releases the lock, then dispatches.
    fn run_expiration_task(inner: &Arc<Self>) {
        let mut collected = Vec::new();
        {
            let mut state = inner.state.write();
            let now = inner.clock.now_nanos();
            loop {
                let head = match state.index.first() {
                    Some(head) if head.expected_at() <= now => head,
                    _ => break,
                };
                head.cancel(false, &inner.clock);
                state.index.remove(&head.key);
                collected.push((head.key.clone(), head.value()));
            }
            Self::arm_head(inner, &mut state);
        }
        inner.dispatch_all(collected);
    }
}

/// The public, thread-safe expiring map. Cloning shares the same
/// underlying state (an `Arc` handle), mirroring `moka::sync::Cache`.
pub struct ExpiringMap<K, V, S = RandomState> {
    inner: Arc<Inner<K, V, S>>,
}

impl<K, V, S> Clone for ExpiringMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> ExpiringMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_builder(
        duration: Duration,
        policy: ExpirationPolicy,
        variable: bool,
        max_size: Option<usize>,
        entry_loader: Option<EntryLoader<K, V>>,
        expiring_entry_loader: Option<ExpiringEntryLoader<K, V>>,
        sync_listeners: Vec<Arc<dyn ExpirationListener<K, V>>>,
        async_listeners: Vec<Arc<dyn ExpirationListener<K, V>>>,
        clock: Clock,
        hasher: S,
    ) -> Self {
        let index = if variable {
            IndexImpl::Variable(VariableIndex::with_hasher(hasher))
        } else {
            IndexImpl::Uniform(UniformIndex::with_hasher(hasher))
        };
        let state = State {
            index,
            uniform_policy: PolicyCell::new(policy),
            uniform_duration: DurationCell::new(duration.as_nanos() as i64),
            variable,
            max_size,
        };
        let dispatcher = Dispatcher::default();
        for listener in sync_listeners {
            dispatcher.add_sync(listener);
        }
        for listener in async_listeners {
            dispatcher.add_async(listener);
        }
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                dispatcher,
                clock,
                entry_loader,
                expiring_entry_loader,
            }),
        }
    }

    /// Builds a new entry's policy/duration cells: shared with the map's
    /// own cells for a uniform map, or fresh private cells seeded from the
    /// map's current defaults for a variable map (spec.md §4.6.1). Using
    /// the shared cells unconditionally would let a later per-key
    /// `set_expiration_for`/`set_expiration_policy_for` on one entry
    /// silently mutate every other entry sharing that cell, defeating
    /// "each entry carries its own duration and policy" for variable maps.
    fn new_entry(state: &State<K, V, S>, key: K, value: V, clock: &Clock) -> Arc<Entry<K, V>> {
        let (policy, duration) = if state.variable {
            (
                PolicyCell::new(state.uniform_policy.get()),
                DurationCell::new(state.uniform_duration.get()),
            )
        } else {
            (state.uniform_policy.clone(), state.uniform_duration.clone())
        };
        Arc::new(Entry::new(key, Arc::new(value), policy, duration, clock))
    }

    /// §4.6.1 `put`.
    pub fn put(&self, key: K, value: V) {
        let mut collected = Vec::new();
        {
            let mut state = self.inner.state.write();
            match state.index.get(&key) {
                None => {
                    let entry = Self::new_entry(&state, key.clone(), value, &self.inner.clock);
                    state.index.put(key, entry);
                }
                Some(entry) => {
                    if entry.policy() == ExpirationPolicy::Created && *entry.value() == value {
                        // Idempotent-put-preserves-deadline rule (invariant 6).
                        return;
                    }
                    entry.set_value(Arc::new(value));
                    Inner::reset_entry(&self.inner, &mut state, &entry, false);
                }
            }
            Inner::enforce_max_size(&mut state, &self.inner.clock, &mut collected);
            Inner::arm_head(&self.inner, &mut state);
        }
        self.inner.dispatch_all(collected);
    }

    /// §4.6.2. Requires a map built with `.variable_expiration()`.
    pub fn put_with_expiration(
        &self,
        key: K,
        value: V,
        policy: ExpirationPolicy,
        duration: Duration,
    ) -> Result<(), Error> {
        let mut collected = Vec::new();
        {
            let mut state = self.inner.state.write();
            if !state.variable {
                return Err(Error::UnsupportedOnUniformMap);
            }
            let duration_nanos = duration.as_nanos() as i64;
            match state.index.get(&key) {
                Some(entry) => {
                    entry.set_value(Arc::new(value));
                    entry.set_policy(policy);
                    entry.set_duration_nanos(duration_nanos);
                    Inner::reset_entry(&self.inner, &mut state, &entry, true);
                }
                None => {
                    let entry = Arc::new(Entry::new(
                        key.clone(),
                        Arc::new(value),
                        PolicyCell::new(policy),
                        DurationCell::new(duration_nanos),
                        &self.inner.clock,
                    ));
                    state.index.put(key, entry);
                }
            }
            Inner::enforce_max_size(&mut state, &self.inner.clock, &mut collected);
            Inner::arm_head(&self.inner, &mut state);
        }
        self.inner.dispatch_all(collected);
        Ok(())
    }

    /// §4.6.3 `get`. Falls back to the configured loader on a miss.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let existing = {
            let state = self.inner.state.read();
            state.index.get(key)
        };
        if let Some(entry) = existing {
            if entry.policy() == ExpirationPolicy::Accessed {
                let mut state = self.inner.state.write();
                Inner::reset_entry(&self.inner, &mut state, &entry, false);
            }
            return Some(entry.value());
        }
        self.load_via_loader(key)
    }

    fn load_via_loader(&self, key: &K) -> Option<Arc<V>> {
        if let Some(loader) = &self.inner.entry_loader {
            let value = loader(key)?;
            let mut state = self.inner.state.write();
            if let Some(existing) = state.index.get(key) {
                return Some(existing.value());
            }
            let entry = Self::new_entry(&state, key.clone(), value, &self.inner.clock);
            state.index.put(key.clone(), Arc::clone(&entry));
            let mut collected = Vec::new();
            Inner::enforce_max_size(&mut state, &self.inner.clock, &mut collected);
            Inner::arm_head(&self.inner, &mut state);
            drop(state);
            self.inner.dispatch_all(collected);
            return Some(entry.value());
        }
        if let Some(loader) = &self.inner.expiring_entry_loader {
            let loaded = loader(key)?;
            let mut state = self.inner.state.write();
            if let Some(existing) = state.index.get(key) {
                return Some(existing.value());
            }
            let policy = loaded.policy.unwrap_or_else(|| state.uniform_policy.get());
            let duration_nanos = loaded
                .duration
                .map(|d| d.as_nanos() as i64)
                .unwrap_or_else(|| state.uniform_duration.get());
            let (policy_cell, duration_cell) = if state.variable {
                (PolicyCell::new(policy), DurationCell::new(duration_nanos))
            } else {
                (state.uniform_policy.clone(), state.uniform_duration.clone())
            };
            let entry = Arc::new(Entry::new(
                key.clone(),
                Arc::new(loaded.value),
                policy_cell,
                duration_cell,
                &self.inner.clock,
            ));
            state.index.put(key.clone(), Arc::clone(&entry));
            let mut collected = Vec::new();
            Inner::enforce_max_size(&mut state, &self.inner.clock, &mut collected);
            Inner::arm_head(&self.inner, &mut state);
            drop(state);
            self.inner.dispatch_all(collected);
            return Some(entry.value());
        }
        None
    }

    /// §4.6.4 `remove`.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let mut state = self.inner.state.write();
        let removed = state.index.remove(key)?;
        removed.cancel(false, &self.inner.clock);
        Inner::arm_head(&self.inner, &mut state);
        Some(removed.value())
    }

    /// §4.6.5, `put` only when present.
    pub fn replace(&self, key: K, value: V) -> Option<Arc<V>> {
        let mut collected = Vec::new();
        let result = {
            let mut state = self.inner.state.write();
            match state.index.get(&key) {
                Some(entry) => {
                    let old = entry.value();
                    if entry.policy() == ExpirationPolicy::Created && *old == value {
                        // Idempotent-put-preserves-deadline rule (invariant 6).
                        return Some(old);
                    }
                    entry.set_value(Arc::new(value));
                    Inner::reset_entry(&self.inner, &mut state, &entry, false);
                    Inner::enforce_max_size(&mut state, &self.inner.clock, &mut collected);
                    Inner::arm_head(&self.inner, &mut state);
                    Some(old)
                }
                None => None,
            }
        };
        self.inner.dispatch_all(collected);
        result
    }

    /// §4.6.5, `replace(old, new)`.
    pub fn replace_if_equals(&self, key: &K, old: &V, new: V) -> bool {
        let mut collected = Vec::new();
        let replaced = {
            let mut state = self.inner.state.write();
            match state.index.get(key) {
                Some(entry) if &*entry.value() == old => {
                    entry.set_value(Arc::new(new));
                    Inner::reset_entry(&self.inner, &mut state, &entry, false);
                    Inner::enforce_max_size(&mut state, &self.inner.clock, &mut collected);
                    Inner::arm_head(&self.inner, &mut state);
                    true
                }
                _ => false,
            }
        };
        self.inner.dispatch_all(collected);
        replaced
    }

    /// §4.6.5, `remove(k, v)`.
    pub fn remove_if_equals(&self, key: &K, value: &V) -> bool {
        let mut state = self.inner.state.write();
        match state.index.get(key) {
            Some(entry) if &*entry.value() == value => {
                state.index.remove(key);
                entry.cancel(false, &self.inner.clock);
                Inner::arm_head(&self.inner, &mut state);
                true
            }
            _ => false,
        }
    }

    /// §4.6.5, `putIfAbsent`.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
        let mut state = self.inner.state.write();
        if let Some(entry) = state.index.get(&key) {
            return Some(entry.value());
        }
        let entry = Self::new_entry(&state, key.clone(), value, &self.inner.clock);
        state.index.put(key, Arc::clone(&entry));
        let mut collected = Vec::new();
        Inner::enforce_max_size(&mut state, &self.inner.clock, &mut collected);
        Inner::arm_head(&self.inner, &mut state);
        drop(state);
        self.inner.dispatch_all(collected);
        None
    }

    /// §4.6.6 `reset_expiration(k)`.
    pub fn reset_expiration(&self, key: &K) -> bool {
        let mut state = self.inner.state.write();
        match state.index.get(key) {
            Some(entry) => {
                Inner::reset_entry(&self.inner, &mut state, &entry, false);
                true
            }
            None => false,
        }
    }

    /// §4.6.7, per-key `set_expiration(k, d, unit)`. Requires variable
    /// expiration.
    pub fn set_expiration_for(&self, key: &K, duration: Duration) -> Result<(), Error> {
        let mut state = self.inner.state.write();
        if !state.variable {
            return Err(Error::UnsupportedOnUniformMap);
        }
        let entry = state.index.get(key).ok_or(Error::NotFound)?;
        entry.set_duration_nanos(duration.as_nanos() as i64);
        Inner::reset_entry(&self.inner, &mut state, &entry, true);
        Ok(())
    }

    /// §4.6.7, per-key `set_expiration_policy(k, p)`. Requires variable
    /// expiration.
    pub fn set_expiration_policy_for(&self, key: &K, policy: ExpirationPolicy) -> Result<(), Error> {
        let mut state = self.inner.state.write();
        if !state.variable {
            return Err(Error::UnsupportedOnUniformMap);
        }
        let entry = state.index.get(key).ok_or(Error::NotFound)?;
        entry.set_policy(policy);
        Inner::reset_entry(&self.inner, &mut state, &entry, true);
        Ok(())
    }

    /// §4.6.8, map-level `set_expiration(d, unit)`. Updates the shared
    /// default duration cell: uniform-variant entries (which hold this
    /// same cell) pick it up immediately; variable-variant entries own
    /// private cells and are unaffected (see SPEC_FULL.md §A.7 and
    /// DESIGN.md for why this is not gated on `variable`).
    pub fn set_expiration(&self, duration: Duration) {
        let state = self.inner.state.write();
        state.uniform_duration.set(duration.as_nanos() as i64);
    }

    /// §4.6.8, map-level `set_expiration_policy(p)`.
    pub fn set_expiration_policy(&self, policy: ExpirationPolicy) {
        let state = self.inner.state.write();
        state.uniform_policy.set(policy);
    }

    /// §4.6.9. Returns the time remaining until `key`'s deadline, in
    /// milliseconds; negative if the deadline has passed but the entry has
    /// not yet been swept by the scheduler (Open Question decision, see
    /// SPEC_FULL.md §A.7.1).
    pub fn get_expected_expiration(&self, key: &K) -> Result<i64, Error> {
        let state = self.inner.state.read();
        let entry = state.index.get(key).ok_or(Error::NotFound)?;
        let now = self.inner.clock.now_nanos();
        Ok((entry.expected_at() - now) / 1_000_000)
    }

    /// The number of live entries. Reader lock only; does not force a
    /// sweep of entries past their deadline but not yet fired.
    pub fn len(&self) -> usize {
        self.inner.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only membership check; unlike `get`, never resets an ACCESSED
    /// entry's deadline.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.state.read().index.contains_key(key)
    }

    /// Removes every entry without dispatching expiration notifications
    /// (this is a bulk `remove`, not a bulk `expire` — see SPEC_FULL.md
    /// §A.6).
    pub fn clear(&self) {
        let mut state = self.inner.state.write();
        for entry in state.index.snapshot() {
            entry.cancel(false, &self.inner.clock);
        }
        state.index.clear();
    }

    fn len_probe(&self) -> Arc<dyn Fn() -> usize + Send + Sync> {
        let inner = Arc::clone(&self.inner);
        Arc::new(move || inner.state.read().index.len())
    }

    pub fn keys(&self) -> KeyIter<K, V> {
        let state = self.inner.state.read();
        let snapshot = state.index.snapshot();
        let expected_len = state.index.len();
        drop(state);
        KeyIter::new(snapshot, expected_len, self.len_probe())
    }

    pub fn values(&self) -> ValueIter<K, V> {
        let state = self.inner.state.read();
        let snapshot = state.index.snapshot();
        let expected_len = state.index.len();
        drop(state);
        ValueIter::new(snapshot, expected_len, self.len_probe())
    }

    pub fn iter(&self) -> EntryIter<K, V> {
        let state = self.inner.state.read();
        let snapshot = state.index.snapshot();
        let expected_len = state.index.len();
        drop(state);
        EntryIter::new(snapshot, expected_len, self.len_probe())
    }

    pub fn add_expiration_listener<L>(&self, listener: L) -> ListenerId
    where
        L: ExpirationListener<K, V> + 'static,
    {
        self.inner.dispatcher.add_sync(Arc::new(listener))
    }

    pub fn add_async_expiration_listener<L>(&self, listener: L) -> ListenerId
    where
        L: ExpirationListener<K, V> + 'static,
    {
        self.inner.dispatcher.add_async(Arc::new(listener))
    }

    pub fn remove_expiration_listener(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.remove_sync(id)
    }

    pub fn remove_async_expiration_listener(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.remove_async(id)
    }

    /// A snapshot of the map's current configuration (grounded on
    /// `arcstur-moka`'s `Policy` struct; see SPEC_FULL.md §A.6).
    pub fn policy(&self) -> Policy {
        let state = self.inner.state.read();
        Policy {
            max_size: state.max_size,
            expiration_policy: state.uniform_policy.get(),
            time_to_live: Duration::from_nanos(state.uniform_duration.get().max(0) as u64),
            variable: state.variable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::MockClock;
    use crate::sync::Builder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn mock_map<V>(duration_ms: i64) -> (ExpiringMap<&'static str, V>, Arc<MockClock>)
    where
        V: PartialEq + Send + Sync + 'static,
    {
        let mock = MockClock::new();
        let map = Builder::new(Duration::from_millis(duration_ms as u64))
            .ticker(mock.clone())
            .build()
            .unwrap();
        (map, mock)
    }

    #[test]
    fn s1_basic_expiry() {
        let (map, mock) = mock_map::<&str>(100);
        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        map.add_expiration_listener(move |k: &&str, v: &&str| {
            events2.lock().unwrap().push((*k, *v));
        });

        map.put("a", "1");
        mock.set_millis(150);
        Inner::run_expiration_task(&map.inner);

        assert!(map.is_empty());
        assert_eq!(*events.lock().unwrap(), vec![("a", "1")]);
    }

    #[test]
    fn s2_accessed_policy() {
        let mock = MockClock::new();
        let map: ExpiringMap<&str, &str> = Builder::new(Duration::from_millis(100))
            .expiration_policy(ExpirationPolicy::Accessed)
            .ticker(mock.clone())
            .build()
            .unwrap();

        map.put("a", "1");
        mock.set_millis(80);
        assert_eq!(map.get(&"a").as_deref(), Some(&"1"));

        mock.set_millis(130);
        assert_eq!(map.get(&"a").as_deref(), Some(&"1"));

        mock.set_millis(200);
        Inner::run_expiration_task(&map.inner);
        assert_eq!(map.get(&"a"), None);
    }

    #[test]
    fn s3_variable_per_entry_expiration() {
        let mock = MockClock::new();
        let map: ExpiringMap<&str, &str> = Builder::new(Duration::from_millis(100))
            .variable_expiration()
            .ticker(mock.clone())
            .build()
            .unwrap();

        map.put_with_expiration("a", "1", ExpirationPolicy::Created, Duration::from_millis(100))
            .unwrap();
        map.put_with_expiration("b", "2", ExpirationPolicy::Created, Duration::from_millis(200))
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        map.add_expiration_listener(move |k: &&str, _v: &&str| {
            events2.lock().unwrap().push(*k);
        });

        mock.set_millis(150);
        Inner::run_expiration_task(&map.inner);
        assert!(!map.contains_key(&"a"));
        assert!(map.contains_key(&"b"));

        mock.set_millis(250);
        Inner::run_expiration_task(&map.inner);
        assert!(map.is_empty());
        assert_eq!(*events.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn s4_max_size_eviction() {
        let mock = MockClock::new();
        let map: ExpiringMap<&str, i32> = Builder::new(Duration::from_secs(3600))
            .max_size(2)
            .ticker(mock)
            .build()
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        map.add_expiration_listener(move |k: &&str, v: &i32| {
            events2.lock().unwrap().push((*k, *v));
        });

        map.put("a", 1);
        map.put("b", 1);
        map.put("c", 1);

        assert!(!map.contains_key(&"a"));
        assert!(map.contains_key(&"b"));
        assert!(map.contains_key(&"c"));
        assert_eq!(*events.lock().unwrap(), vec![("a", 1)]);
    }

    #[test]
    fn s5_idempotent_put_under_created() {
        let (map, mock) = mock_map::<&str>(100);
        map.put("k", "v");
        mock.set_millis(80);
        map.put("k", "v");
        mock.set_millis(110);
        Inner::run_expiration_task(&map.inner);
        assert!(map.is_empty());
    }

    #[test]
    fn s6_loader_path() {
        let mock = MockClock::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let loads2 = Arc::clone(&loads);
        let map: ExpiringMap<&str, String> = Builder::new(Duration::from_millis(100))
            .entry_loader(move |k: &&str| {
                loads2.fetch_add(1, Ordering::SeqCst);
                Some(format!("{}!", k))
            })
            .ticker(mock)
            .build()
            .unwrap();

        assert_eq!(map.get(&"x").as_deref(), Some(&"x!".to_string()));
        assert_eq!(map.get(&"x").as_deref(), Some(&"x!".to_string()));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn put_then_remove_cancels_pending_firing() {
        let (map, _mock) = mock_map::<&str>(100);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        map.add_expiration_listener(move |_k: &&str, _v: &&str| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        map.put("a", "1");
        map.remove(&"a");
        assert!(map.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reset_expiration_extends_deadline() {
        let (map, mock) = mock_map::<&str>(100);
        map.put("a", "1");
        mock.set_millis(50);
        assert!(map.reset_expiration(&"a"));
        let remaining = map.get_expected_expiration(&"a").unwrap();
        assert_eq!(remaining, 100);
    }

    #[test]
    fn put_if_absent_does_not_overwrite() {
        let (map, _mock) = mock_map::<&str>(1000);
        assert_eq!(map.put_if_absent("a", "1"), None);
        assert_eq!(map.put_if_absent("a", "2").as_deref(), Some(&"1"));
        assert_eq!(map.get(&"a").as_deref(), Some(&"1"));
    }

    #[test]
    fn replace_if_equals_checks_current_value() {
        let (map, _mock) = mock_map::<&str>(1000);
        map.put("a", "1");
        assert!(!map.replace_if_equals(&"a", &"wrong", "2"));
        assert!(map.replace_if_equals(&"a", &"1", "2"));
        assert_eq!(map.get(&"a").as_deref(), Some(&"2"));
    }

    #[test]
    fn variable_operations_rejected_on_uniform_map() {
        let (map, _mock) = mock_map::<&str>(100);
        map.put("a", "1");
        let result = map.set_expiration_for(&"a", Duration::from_millis(1));
        assert!(matches!(result, Err(Error::UnsupportedOnUniformMap)));
    }

    #[test]
    fn get_expected_expiration_not_found() {
        let (map, _mock) = mock_map::<&str>(100);
        assert!(matches!(
            map.get_expected_expiration(&"missing"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    #[should_panic(expected = "modified during iteration")]
    fn iteration_detects_concurrent_modification() {
        let (map, _mock) = mock_map::<&str>(1000);
        map.put("a", "1");
        map.put("b", "2");
        let mut iter = map.keys();
        map.put("c", "3");
        // The snapshot was two entries; the map now has three.
        for _ in 0..3 {
            iter.next();
        }
    }

    #[test]
    fn concurrent_puts_and_removes_stay_consistent() {
        let map: ExpiringMap<i32, i32> = Builder::new(Duration::from_secs(3600)).build().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        map.put(t * 100 + i, i);
                    }
                    for i in 0..25 {
                        map.remove(&(t * 100 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 4 * 25);
    }
}
