//! Partition-scoped locking.
//!
//! Every mutation of an ordered list runs under the async mutex of the
//! partition(s) it touches. This is the engine's only blocking point:
//! moves in unrelated stages never serialize against each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Key of one ordered collection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    /// The global stage list.
    Stages,
    /// One stage's deal list.
    Deals(Uuid),
}

#[derive(Clone, Default)]
pub struct PartitionLocks {
    inner: Arc<StdMutex<HashMap<Partition, Arc<Mutex<()>>>>>,
}

impl PartitionLocks {
    fn handle(&self, key: Partition) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("partition lock registry poisoned");
        map.entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: Partition) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }

    /// Lock several partitions at once. Keys are deduplicated and acquired
    /// in canonical order so overlapping lock sets cannot deadlock.
    pub async fn lock_all(&self, mut keys: Vec<Partition>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_partition_serializes() {
        let locks = PartitionLocks::default();
        let key = Partition::Deals(Uuid::new_v4());
        let first = locks.lock(key).await;
        let second = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock(key).await })
        };
        // The spawned task cannot finish while the first guard is held.
        tokio::task::yield_now().await;
        assert!(!second.is_finished());
        drop(first);
        second.await.expect("lock task");
    }

    #[tokio::test]
    async fn lock_all_deduplicates() {
        let locks = PartitionLocks::default();
        let stage = Uuid::new_v4();
        let guards = locks
            .lock_all(vec![Partition::Deals(stage), Partition::Deals(stage)])
            .await;
        assert_eq!(guards.len(), 1);
    }
}
