use std::{collections::HashMap, hash::Hash, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per key, created on first use and never removed.
///
/// Guards are owned, so they can be held across awaits and moved into
/// spawned tasks.
pub struct LockArena<K, V> {
    entries: Mutex<HashMap<K, Arc<AsyncMutex<V>>>>,
}

impl<K, V> Default for LockArena<K, V> {
    fn default() -> Self {
        LockArena {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Default> LockArena<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<V> {
        let entry = {
            let mut entries = self.entries.lock();
            entries.entry(key.clone()).or_default().clone()
        };
        entry.lock_owned().await
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
