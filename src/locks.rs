use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// One async mutex per key, created on first use. Different keys never contend.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. The guard releases on drop.
    pub async fn lock(&self, key: Ulid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is not held across the await.
        let slot = self.slots.entry(key).or_default().value().clone();
        slot.lock_owned().await
    }

    /// Drop slots nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let key = Ulid::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _g = locks.lock(key).await;
                let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(Ulid::new()).await;
        // Would hang if keys shared a mutex.
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Ulid::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn prune_keeps_held_slots() {
        let locks = KeyedLocks::new();
        let held = Ulid::new();
        let guard = locks.lock(held).await;
        drop(locks.lock(Ulid::new()).await);
        assert_eq!(locks.len(), 2);
        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert_eq!(locks.prune_idle(), 1);
        assert!(locks.is_empty());
    }
}
