//! Name-keyed pool with one in-flight creation per key.

use std::{
    collections::HashMap,
    future::Future,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot<V> = Arc<AsyncMutex<Option<V>>>;

/// Pool of lazily created values, one per key.
///
/// Callers racing on the same key serialize on that key's slot, so the
/// value is created once; different keys never wait on each other.
pub struct KeyedPool<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
}

impl<V> Default for KeyedPool<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

/// Exclusive access to one key of a [`KeyedPool`].
///
/// A slot left empty when the guard drops is removed from the pool.
pub struct SlotGuard<'a, V> {
    pool: &'a KeyedPool<V>,
    key: String,
    guard: OwnedMutexGuard<Option<V>>,
}

impl<V> Deref for SlotGuard<'_, V> {
    type Target = Option<V>;

    fn deref(&self) -> &Option<V> {
        &self.guard
    }
}

impl<V> DerefMut for SlotGuard<'_, V> {
    fn deref_mut(&mut self) -> &mut Option<V> {
        &mut self.guard
    }
}

impl<V> Drop for SlotGuard<'_, V> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            return;
        }
        let mut slots = self.pool.slots.lock().unwrap_or_else(|e| e.into_inner());
        let current = slots
            .get(&self.key)
            .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(&self.guard)));
        if current {
            slots.remove(&self.key);
        }
    }
}

impl<V: Clone> KeyedPool<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot<V> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn is_current(&self, key: &str, guard: &OwnedMutexGuard<Option<V>>) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(key)
            .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(guard)))
    }

    /// Exclusive access to the slot for `key`. Holding the guard blocks
    /// other callers of the same key only.
    pub async fn lock_slot(&self, key: &str) -> SlotGuard<'_, V> {
        loop {
            let guard = self.slot(key).lock_owned().await;
            // The slot may have been removed or discarded while we waited.
            if self.is_current(key, &guard) {
                return SlotGuard {
                    pool: self,
                    key: key.to_string(),
                    guard,
                };
            }
        }
    }

    /// The pooled value for `key`, creating it with `create` if absent.
    /// A failed creation leaves nothing behind.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut slot = self.lock_slot(key).await;
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let created = create().await?;
        *slot = Some(created.clone());
        Ok(created)
    }

    /// The pooled value for `key` without waiting on an in-flight creation.
    pub fn get(&self, key: &str) -> Option<V> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get(key)?;
        slot.try_lock().ok().and_then(|v| v.clone())
    }

    /// Values currently present. Slots being filled are skipped.
    pub fn values(&self) -> Vec<V> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .values()
            .filter_map(|slot| slot.try_lock().ok().and_then(|v| v.clone()))
            .collect()
    }

    /// Every present value, waiting for slots locked by other callers.
    pub async fn snapshot(&self) -> Vec<V> {
        let slots: Vec<Slot<V>> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.values().cloned().collect()
        };
        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(v) = slot.lock().await.clone() {
                values.push(v);
            }
        }
        values
    }

    pub fn keys(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<_> = slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take `key` out of the pool, waiting for an in-flight creation first.
    pub async fn remove(&self, key: &str) -> Option<V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.remove(key)?
        };
        slot.lock().await.take()
    }

    /// Empty the pool and return every value it held, keyed by name.
    pub async fn drain(&self) -> Vec<(String, V)> {
        let slots: Vec<_> = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.drain().collect()
        };
        let mut drained = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            if let Some(v) = slot.lock().await.take() {
                drained.push((key, v));
            }
        }
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }
}
