//! Per-user run serialization
//!
//! The only shared in-process state of the synchronizer: one async mutex per
//! user email, dropped from the table once nobody holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of one user's synchronization run
pub type UserGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct UserLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other run holds `email`, then hold it.
    pub async fn lock(&self, email: &str) -> UserGuard {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only the table references are idle
            table.retain(|_, slot| Arc::strong_count(slot) > 1);
            table.entry(email.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of users currently locked or awaited
    pub fn active(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.values().filter(|slot| Arc::strong_count(slot) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_user_waits() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.lock("a@x.com").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("a@x.com").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_users_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.lock("a@x.com").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b@x.com"))
            .await
            .unwrap();
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = UserLocks::new();
        drop(locks.lock("a@x.com").await);
        drop(locks.lock("b@x.com").await);
        assert_eq!(locks.active(), 0);

        let _c = locks.lock("c@x.com").await;
        let table = locks.table.lock().unwrap();
        assert_eq!(table.len(), 1);
    }
}
