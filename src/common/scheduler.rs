//! Scheduler (C4): a process-wide single-thread worker that runs the
//! earliest-due entry's expiration task, plus a process-wide pool used by
//! the listener dispatcher (C5) to offload slow/async listeners.
//!
//! Both are lazily-initialized singletons, matching spec.md §5's "Shared
//! resources" note. `scheduled_thread_pool::ScheduledThreadPool` (a direct
//! teacher dependency, previously used there only for the housekeeper's
//! periodic sync job — see DESIGN.md) already provides exactly the
//! "schedule one cancellable job" primitive §4.4 asks for.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use scheduled_thread_pool::ScheduledThreadPool;

use super::error::Error;

const DEFAULT_SCHEDULER_NAME: &str = "expiring-map-scheduler";
const DEFAULT_LISTENER_POOL_NAME: &str = "expiring-map-listeners";

static THREAD_NAME: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));
static SCHEDULER: Lazy<Mutex<Option<Arc<ScheduledThreadPool>>>> = Lazy::new(|| Mutex::new(None));
static LISTENER_POOL: Lazy<Mutex<Option<Arc<ScheduledThreadPool>>>> = Lazy::new(|| Mutex::new(None));

/// Overrides the base name used for the process-wide scheduler and
/// listener-pool threads. Must be called before the first map is built
/// (i.e. before [`scheduler`]/[`listener_pool`] are first invoked);
/// `scheduled_thread_pool` only exposes thread *naming*, not a raw spawn
/// hook, so that is the granularity at which this crate can honor "thread
/// factory, replaceable at process init" (see SPEC_FULL.md §A.8).
pub fn init_thread_factory(name: impl Into<String>) -> Result<(), Error> {
    let mut guard = THREAD_NAME.lock();
    if guard.is_some() || SCHEDULER.lock().is_some() || LISTENER_POOL.lock().is_some() {
        return Err(Error::ThreadFactoryAlreadySet);
    }
    *guard = Some(name.into());
    Ok(())
}

/// Stops the process-wide scheduler and listener pool. Maps that already
/// hold a clone of either `Arc` keep running against it until they are
/// dropped; a later call into [`scheduler`]/[`listener_pool`] lazily
/// re-initializes a fresh pool.
pub fn shutdown() {
    *SCHEDULER.lock() = None;
    *LISTENER_POOL.lock() = None;
    *THREAD_NAME.lock() = None;
}

pub(crate) fn scheduler() -> Arc<ScheduledThreadPool> {
    let mut guard = SCHEDULER.lock();
    if let Some(pool) = guard.as_ref() {
        return Arc::clone(pool);
    }
    let name = THREAD_NAME
        .lock()
        .clone()
        .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string());
    let pool = Arc::new(ScheduledThreadPool::with_name(&name, 1));
    *guard = Some(Arc::clone(&pool));
    pool
}

pub(crate) fn listener_pool() -> Arc<ScheduledThreadPool> {
    let mut guard = LISTENER_POOL.lock();
    if let Some(pool) = guard.as_ref() {
        return Arc::clone(pool);
    }
    let base = THREAD_NAME
        .lock()
        .clone()
        .unwrap_or_else(|| DEFAULT_LISTENER_POOL_NAME.to_string());
    let size = num_cpus::get().max(1);
    let pool = Arc::new(ScheduledThreadPool::with_name(&base, size));
    *guard = Some(Arc::clone(&pool));
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn schedule_and_cancel() {
        let pool = scheduler();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = pool.execute_after(Duration::from_secs(60), move || {
            flag.store(true, Ordering::SeqCst);
        });
        handle.cancel();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
