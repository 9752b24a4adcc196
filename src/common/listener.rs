//! Listener dispatcher (C5): synchronous listeners with an adaptive
//! inline/offload policy, plus always-offloaded asynchronous listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::scheduler::listener_pool;

/// A callback invoked once for each entry that expires.
///
/// Implemented for any `Fn(&K, &V) + Send + Sync` closure, so most callers
/// never need to name this trait directly.
pub trait ExpirationListener<K, V>: Send + Sync {
    fn on_expire(&self, key: &K, value: &V);
}

impl<K, V, F> ExpirationListener<K, V> for F
where
    F: Fn(&K, &V) + Send + Sync,
{
    fn on_expire(&self, key: &K, value: &V) {
        self(key, value)
    }
}

const POLICY_UNKNOWN: u8 = 0;
const POLICY_INLINE: u8 = 1;
const POLICY_OFFLOAD: u8 = 2;

/// Threshold past which an `unknown`-policy listener is moved to `offload`.
const ADAPTIVE_THRESHOLD: Duration = Duration::from_millis(100);

pub type ListenerId = usize;

struct SyncSlot<K, V> {
    id: ListenerId,
    listener: Arc<dyn ExpirationListener<K, V>>,
    policy: AtomicU8,
}

struct AsyncSlot<K, V> {
    id: ListenerId,
    listener: Arc<dyn ExpirationListener<K, V>>,
}

fn invoke_guarded<K, V>(listener: &dyn ExpirationListener<K, V>, key: &K, value: &V) {
    let result = catch_unwind(AssertUnwindSafe(|| listener.on_expire(key, value)));
    if result.is_err() {
        #[cfg(feature = "logging")]
        log::warn!("an expiration listener panicked; its result is discarded");
    }
}

/// Holds the sync/async listener lists for one map. `K`/`V` must be
/// `Send + Sync + 'static` to cross into the offload pool's worker
/// threads.
pub(crate) struct Dispatcher<K, V> {
    sync_listeners: RwLock<SmallVec<[Arc<SyncSlot<K, V>>; 4]>>,
    async_listeners: RwLock<SmallVec<[Arc<AsyncSlot<K, V>>; 4]>>,
    next_id: AtomicUsize,
}

impl<K, V> Default for Dispatcher<K, V> {
    fn default() -> Self {
        Self {
            sync_listeners: RwLock::new(SmallVec::new()),
            async_listeners: RwLock::new(SmallVec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<K, V> Dispatcher<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn alloc_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_sync(&self, listener: Arc<dyn ExpirationListener<K, V>>) -> ListenerId {
        let id = self.alloc_id();
        self.sync_listeners.write().push(Arc::new(SyncSlot {
            id,
            listener,
            policy: AtomicU8::new(POLICY_UNKNOWN),
        }));
        id
    }

    pub(crate) fn add_async(&self, listener: Arc<dyn ExpirationListener<K, V>>) -> ListenerId {
        let id = self.alloc_id();
        self.async_listeners
            .write()
            .push(Arc::new(AsyncSlot { id, listener }));
        id
    }

    pub(crate) fn remove_sync(&self, id: ListenerId) -> bool {
        let mut list = self.sync_listeners.write();
        let before = list.len();
        list.retain(|slot| slot.id != id);
        list.len() != before
    }

    pub(crate) fn remove_async(&self, id: ListenerId) -> bool {
        let mut list = self.async_listeners.write();
        let before = list.len();
        list.retain(|slot| slot.id != id);
        list.len() != before
    }

    pub(crate) fn has_listeners(&self) -> bool {
        !self.sync_listeners.read().is_empty() || !self.async_listeners.read().is_empty()
    }

    /// Dispatches a single expired (or explicitly removed) entry to every
    /// registered listener. Listeners are snapshotted under their own lock
    /// before iterating, so a listener removing itself mid-dispatch cannot
    /// deadlock or panic the dispatcher (see SPEC_FULL.md §A.7.2).
    pub(crate) fn dispatch(&self, key: K, value: Arc<V>) {
        let async_snapshot: SmallVec<[_; 4]> = self.async_listeners.read().clone();
        for slot in async_snapshot.iter() {
            let listener = Arc::clone(&slot.listener);
            let key = key.clone();
            let value = Arc::clone(&value);
            listener_pool().execute(move || invoke_guarded(&*listener, &key, &value));
        }

        let sync_snapshot: SmallVec<[_; 4]> = self.sync_listeners.read().clone();
        for slot in sync_snapshot.iter() {
            match slot.policy.load(Ordering::Acquire) {
                POLICY_INLINE => invoke_guarded(&*slot.listener, &key, &value),
                POLICY_OFFLOAD => {
                    let listener = Arc::clone(&slot.listener);
                    let key = key.clone();
                    let value = Arc::clone(&value);
                    listener_pool().execute(move || invoke_guarded(&*listener, &key, &value));
                }
                _ => {
                    let start = Instant::now();
                    invoke_guarded(&*slot.listener, &key, &value);
                    let elapsed = start.elapsed();
                    let new_policy = if elapsed > ADAPTIVE_THRESHOLD {
                        POLICY_OFFLOAD
                    } else {
                        POLICY_INLINE
                    };
                    slot.policy.store(new_policy, Ordering::Release);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn sync_listener_fires_inline() {
        let dispatcher: Dispatcher<&'static str, i32> = Dispatcher::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        dispatcher.add_sync(Arc::new(move |k: &&str, v: &i32| {
            seen2.lock().unwrap().push((*k, *v));
        }));
        dispatcher.dispatch("a", Arc::new(1));
        assert_eq!(*seen.lock().unwrap(), vec![("a", 1)]);
    }

    #[test]
    fn panicking_listener_does_not_abort_dispatch() {
        let dispatcher: Dispatcher<&'static str, i32> = Dispatcher::default();
        let count = Arc::new(StdAtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        dispatcher.add_sync(Arc::new(|_: &&str, _: &i32| panic!("boom")));
        dispatcher.add_sync(Arc::new(move |_: &&str, _: &i32| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        dispatcher.dispatch("a", Arc::new(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_sync_listener_by_id() {
        let dispatcher: Dispatcher<&'static str, i32> = Dispatcher::default();
        let id = dispatcher.add_sync(Arc::new(|_: &&str, _: &i32| {}));
        assert!(dispatcher.remove_sync(id));
        assert!(!dispatcher.remove_sync(id));
    }

    #[cfg(feature = "logging")]
    #[test]
    fn panicking_listener_logs_a_warning() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dispatcher: Dispatcher<&'static str, i32> = Dispatcher::default();
        dispatcher.add_sync(Arc::new(|_: &&str, _: &i32| panic!("boom")));
        // Asserts only that dispatch still returns normally; the `log::warn!`
        // line itself is exercised for coverage under `--features logging`.
        dispatcher.dispatch("a", Arc::new(1));
    }
}
