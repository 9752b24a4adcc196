//! Builder (C7): enumerated configuration options feeding the expiration
//! engine. Mirrors `moka::sync::Builder`'s method-chaining shape, with a
//! mandatory default duration taking the place of `moka`'s mandatory
//! capacity argument.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use crate::common::entry::ExpirationPolicy;
use crate::common::error::Error;
use crate::common::listener::ExpirationListener;
use crate::common::time::{Clock, Ticker};

use super::cache::ExpiringMap;

/// The value returned by an [`expiring_entry_loader`](Builder::expiring_entry_loader),
/// carrying optional per-entry overrides of the map's default policy and
/// duration. Fields left `None` fall back to the map's defaults.
pub struct LoadedEntry<V> {
    pub value: V,
    pub policy: Option<ExpirationPolicy>,
    pub duration: Option<Duration>,
}

impl<V> LoadedEntry<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            policy: None,
            duration: None,
        }
    }

    pub fn with_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

pub(crate) type EntryLoader<K, V> = Box<dyn Fn(&K) -> Option<V> + Send + Sync>;
pub(crate) type ExpiringEntryLoader<K, V> = Box<dyn Fn(&K) -> Option<LoadedEntry<V>> + Send + Sync>;

/// Configuration for an [`ExpiringMap`].
pub struct Builder<K, V, S = RandomState> {
    duration: Duration,
    policy: ExpirationPolicy,
    variable: bool,
    max_size: Option<usize>,
    entry_loader: Option<EntryLoader<K, V>>,
    expiring_entry_loader: Option<ExpiringEntryLoader<K, V>>,
    sync_listeners: Vec<Arc<dyn ExpirationListener<K, V>>>,
    async_listeners: Vec<Arc<dyn ExpirationListener<K, V>>>,
    ticker: Option<Arc<dyn Ticker>>,
    hasher: S,
}

impl<K, V> Builder<K, V, RandomState> {
    /// Starts a new builder with `duration` as the map's default entry
    /// lifetime (the uniform-expiration duration, and the fallback for
    /// variable-expiration entries that don't supply their own).
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            policy: ExpirationPolicy::Created,
            variable: false,
            max_size: None,
            entry_loader: None,
            expiring_entry_loader: None,
            sync_listeners: Vec::new(),
            async_listeners: Vec::new(),
            ticker: None,
            hasher: RandomState::default(),
        }
    }
}

impl<K, V, S> Builder<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    /// Overrides the default entry lifetime set in [`Builder::new`].
    pub fn expiration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// `CREATED` (default) or `ACCESSED`.
    pub fn expiration_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enables per-entry policy/duration and switches the entry index to
    /// deadline-ordered.
    pub fn variable_expiration(mut self) -> Self {
        self.variable = true;
        self
    }

    /// Caps the live entry count; over-cap insertion evicts the head entry.
    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = Some(n);
        self
    }

    /// A synchronous loader invoked by `get` on a miss. Mutually exclusive
    /// with [`expiring_entry_loader`](Builder::expiring_entry_loader).
    pub fn entry_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&K) -> Option<V> + Send + Sync + 'static,
    {
        self.entry_loader = Some(Box::new(loader));
        self
    }

    /// A loader that may also override the loaded entry's policy/duration.
    /// Mutually exclusive with [`entry_loader`](Builder::entry_loader).
    pub fn expiring_entry_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&K) -> Option<LoadedEntry<V>> + Send + Sync + 'static,
    {
        self.expiring_entry_loader = Some(Box::new(loader));
        self
    }

    /// Adds a synchronous (adaptive) expiration listener.
    pub fn expiration_listener<L>(mut self, listener: L) -> Self
    where
        L: ExpirationListener<K, V> + 'static,
    {
        self.sync_listeners.push(Arc::new(listener));
        self
    }

    /// Adds a listener always invoked on the dispatch pool.
    pub fn async_expiration_listener<L>(mut self, listener: L) -> Self
    where
        L: ExpirationListener<K, V> + 'static,
    {
        self.async_listeners.push(Arc::new(listener));
        self
    }

    /// Replaces the time source. Intended for tests; see
    /// [`crate::MockClock`].
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = Some(ticker);
        self
    }

    /// Uses a custom hasher for the underlying key index.
    pub fn build_with_hasher<S2>(self, hasher: S2) -> Result<ExpiringMap<K, V, S2>, Error>
    where
        S2: BuildHasher + Clone + Send + Sync + 'static,
    {
        if self.entry_loader.is_some() && self.expiring_entry_loader.is_some() {
            return Err(Error::BothLoaderKinds);
        }
        let clock = self
            .ticker
            .map(Clock::from_ticker)
            .unwrap_or_else(Clock::system);
        Ok(ExpiringMap::from_builder(
            self.duration,
            self.policy,
            self.variable,
            self.max_size,
            self.entry_loader,
            self.expiring_entry_loader,
            self.sync_listeners,
            self.async_listeners,
            clock,
            hasher,
        ))
    }
}

impl<K, V, S> Builder<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + Default + 'static,
{
    /// Builds the map using the builder's configured hasher (`RandomState`
    /// by default).
    pub fn build(self) -> Result<ExpiringMap<K, V, S>, Error> {
        let hasher = self.hasher.clone();
        self.build_with_hasher(hasher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_loader_kinds() {
        let result = Builder::<&str, i32>::new(Duration::from_secs(1))
            .entry_loader(|_k: &&str| Some(1))
            .expiring_entry_loader(|_k: &&str| Some(LoadedEntry::new(1)))
            .build();
        assert!(matches!(result, Err(Error::BothLoaderKinds)));
    }

    #[test]
    fn builds_with_defaults() {
        let map = Builder::<&str, i32>::new(Duration::from_secs(1)).build();
        assert!(map.is_ok());
    }
}
