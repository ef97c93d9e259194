//! Per-user mutual exclusion
//!
//! Each user gets an async mutex created on first use and pruned once no
//! task holds or waits on it.

use crate::event::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct UserLocks {
    slots: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one user until dropped
pub struct UserGuard<'a> {
    locks: &'a UserLocks,
    id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<UserId, Arc<AsyncMutex<()>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until no other task holds `id`
    pub async fn lock(&self, id: UserId) -> UserGuard<'_> {
        let slot = Arc::clone(self.slots().entry(id).or_default());
        let guard = slot.lock_owned().await;
        UserGuard {
            locks: self,
            id,
            guard: Some(guard),
        }
    }

    /// Number of users currently locked or waited on
    pub fn active(&self) -> usize {
        self.slots().len()
    }
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.locks.slots();
        // Waiters hold a clone, so a count of one means the map is the only owner.
        if slots
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = Arc::new(UserLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _guard = locks.lock(UserId(1)).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn distinct_users_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.lock(UserId(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(UserId(2))).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_slot_is_pruned() {
        let locks = UserLocks::new();
        {
            let _guard = locks.lock(UserId(3)).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }
}
