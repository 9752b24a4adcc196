//! A thread-safe, in-memory map whose entries expire after a configurable
//! duration.
//!
//! The map supports two expiration modes:
//!
//! - **Uniform expiration**: every entry shares one duration and one
//!   [`ExpirationPolicy`] (`CREATED` or `ACCESSED`).
//! - **Variable expiration**: each entry carries its own duration and
//!   policy, set at insertion time via [`sync::ExpiringMap::put_with_expiration`]
//!   or later via [`sync::ExpiringMap::set_expiration`].
//!
//! A single background worker fires expirations in deadline order and
//! notifies registered listeners, either inline or on a dispatch pool,
//! depending on how long that listener has historically taken to run.
//!
//! ```
//! use std::time::Duration;
//! use expiring_map::sync::Builder;
//!
//! let map = Builder::new(Duration::from_secs(60)).build().unwrap();
//! map.put("session-id", "alice");
//! assert_eq!(map.get(&"session-id").as_deref(), Some(&"alice"));
//! ```

pub(crate) mod common;
pub mod sync;

pub use common::error::Error;
pub use common::{init_thread_factory, shutdown, Clock, ExpirationListener, ExpirationPolicy, MockClock, Ticker};
