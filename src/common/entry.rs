//! Entry record (C2): key/value plus expiration metadata.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use scheduled_thread_pool::JobHandle;
use uuid::Uuid;

use super::time::Clock;

/// `CREATED`: the deadline is set once, at insertion, and only reset by an
/// explicit `reset_expiration`/`set_expiration` call or a value replacement
/// that is *not* equal to the existing value.
///
/// `ACCESSED`: every successful `get` resets the deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpirationPolicy {
    Created,
    Accessed,
}

impl ExpirationPolicy {
    const CREATED_TAG: u8 = 0;
    const ACCESSED_TAG: u8 = 1;

    fn to_tag(self) -> u8 {
        match self {
            ExpirationPolicy::Created => Self::CREATED_TAG,
            ExpirationPolicy::Accessed => Self::ACCESSED_TAG,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            Self::ACCESSED_TAG => ExpirationPolicy::Accessed,
            _ => ExpirationPolicy::Created,
        }
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        ExpirationPolicy::Created
    }
}

/// A policy cell, shared across every entry of a uniform-expiration map or
/// privately owned by a single entry of a variable-expiration map.
#[derive(Clone)]
pub(crate) struct PolicyCell(Arc<AtomicU8>);

impl PolicyCell {
    pub(crate) fn new(policy: ExpirationPolicy) -> Self {
        Self(Arc::new(AtomicU8::new(policy.to_tag())))
    }

    pub(crate) fn get(&self) -> ExpirationPolicy {
        ExpirationPolicy::from_tag(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, policy: ExpirationPolicy) {
        self.0.store(policy.to_tag(), Ordering::Release);
    }
}

/// A duration cell (nanoseconds), shared or private as above.
#[derive(Clone)]
pub(crate) struct DurationCell(Arc<AtomicI64>);

impl DurationCell {
    pub(crate) fn new(nanos: i64) -> Self {
        Self(Arc::new(AtomicI64::new(nanos)))
    }

    pub(crate) fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, nanos: i64) {
        self.0.store(nanos, Ordering::Release);
    }
}

struct EntryState<V> {
    value: Arc<V>,
    expected_at: i64,
    sched_handle: Option<JobHandle>,
    scheduled: bool,
}

/// A single map entry: key, value, its expiration policy/duration cells,
/// its computed deadline, and its pending scheduling handle.
///
/// All mutable state lives behind a single `Mutex`. In practice every
/// mutation already happens while the owning map's writer lock is held, so
/// this inner lock is uncontended; it exists so `Entry` can be shared via
/// `Arc` between the index's hash lookup and its ordering structure without
/// `unsafe`.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    /// Tie-breaks entries with identical deadlines in the variable index;
    /// see spec invariant 3.
    pub(crate) id: Uuid,
    policy: PolicyCell,
    duration: DurationCell,
    state: Mutex<EntryState<V>>,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(
        key: K,
        value: Arc<V>,
        policy: PolicyCell,
        duration: DurationCell,
        clock: &Clock,
    ) -> Self {
        let expected_at = clock.now_nanos() + duration.get();
        Self {
            key,
            id: Uuid::new_v4(),
            policy,
            duration,
            state: Mutex::new(EntryState {
                value,
                expected_at,
                sched_handle: None,
                scheduled: false,
            }),
        }
    }

    pub(crate) fn value(&self) -> Arc<V> {
        Arc::clone(&self.state.lock().value)
    }

    pub(crate) fn set_value(&self, value: Arc<V>) {
        self.state.lock().value = value;
    }

    pub(crate) fn expected_at(&self) -> i64 {
        self.state.lock().expected_at
    }

    pub(crate) fn policy(&self) -> ExpirationPolicy {
        self.policy.get()
    }

    pub(crate) fn set_policy(&self, policy: ExpirationPolicy) {
        self.policy.set(policy);
    }

    pub(crate) fn duration_nanos(&self) -> i64 {
        self.duration.get()
    }

    pub(crate) fn set_duration_nanos(&self, nanos: i64) {
        self.duration.set(nanos);
    }

    /// Recomputes `expected_at` from the current duration cell.
    pub(crate) fn reset_deadline(&self, clock: &Clock) {
        let mut state = self.state.lock();
        state.expected_at = clock.now_nanos() + self.duration.get();
    }

    /// Cancels any pending scheduled firing. Idempotent. Optionally resets
    /// the deadline in the same critical section. Returns whether a firing
    /// was actually pending.
    pub(crate) fn cancel(&self, reset: bool, clock: &Clock) -> bool {
        let mut state = self.state.lock();
        if let Some(handle) = state.sched_handle.take() {
            handle.cancel();
        }
        let was_scheduled = state.scheduled;
        state.scheduled = false;
        if reset {
            state.expected_at = clock.now_nanos() + self.duration.get();
        }
        was_scheduled
    }

    pub(crate) fn attach_schedule(&self, handle: JobHandle) {
        let mut state = self.state.lock();
        state.sched_handle = Some(handle);
        state.scheduled = true;
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::MockClock;

    #[test]
    fn idempotent_cancel() {
        let mock = MockClock::new();
        let clock = Clock::from_ticker(mock);
        let entry = Entry::new(
            "a",
            Arc::new(1),
            PolicyCell::new(ExpirationPolicy::Created),
            DurationCell::new(1_000_000),
            &clock,
        );
        assert!(!entry.cancel(false, &clock));
        assert!(!entry.cancel(false, &clock));
    }

    #[test]
    fn reset_deadline_uses_current_duration() {
        let mock = MockClock::new();
        let clock = Clock::from_ticker(mock.clone());
        let entry = Entry::new(
            "a",
            Arc::new(1),
            PolicyCell::new(ExpirationPolicy::Created),
            DurationCell::new(100),
            &clock,
        );
        assert_eq!(entry.expected_at(), 100);
        mock.advance(std::time::Duration::from_nanos(50));
        entry.reset_deadline(&clock);
        assert_eq!(entry.expected_at(), 150);
    }
}
