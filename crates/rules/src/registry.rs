//! Build-once lookup maps.

use std::fmt;
use std::hash::Hash;

use dashmap::DashMap;
use parking_lot::ReentrantMutex;

/// Concurrent map whose values are built at most once per key.
///
/// Lookups go through the `DashMap` without the build lock; a miss takes the
/// build lock, checks again and builds. The lock is reentrant so a builder may
/// look up other keys of the same map.
pub(crate) struct OnceMap<K, V> {
    entries: DashMap<K, V>,
    build: ReentrantMutex<()>,
}

impl<K: Eq + Hash, V> fmt::Debug for OnceMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceMap")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<K: Eq + Hash, V> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            build: ReentrantMutex::new(()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> OnceMap<K, V> {
    /// The value under `key`, building it with `build` on a miss. A failed
    /// build stores nothing.
    pub(crate) fn get_or_try_build<E>(
        &self,
        key: K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.value().clone());
        }
        let _guard = self.build.lock();
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.value().clone());
        }
        let value = build()?;
        self.entries.insert(key, value.clone());
        Ok(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        let _guard = self.build.lock();
        self.entries.clear();
    }
}
