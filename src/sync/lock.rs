//! Per-account mutual exclusion.
//!
//! The lock is the only concurrency primitive the engine needs: it prevents
//! two overlapping runs for the same account (a manual trigger racing the
//! scheduled sweep). Entries carry a TTL sized to the worst-case run so a
//! killed process cannot wedge an account forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Mutual-exclusion lock keyed by account id.
pub trait SyncLock: Send + Sync {
    /// Try to take the lock. Returns false if another holder is active.
    fn acquire(&self, key: &str, ttl: Duration) -> bool;
    fn release(&self, key: &str);
}

/// In-process lock table with per-entry expiry.
#[derive(Default)]
pub struct LocalLock {
    entries: Mutex<HashMap<String, Instant>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncLock for LocalLock {
    fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match entries.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                entries.insert(key.to_string(), now + ttl);
                true
            }
        }
    }

    fn release(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_then_conflict() {
        let lock = LocalLock::new();
        assert!(lock.acquire("dav_sync:a1", Duration::from_secs(600)));
        assert!(!lock.acquire("dav_sync:a1", Duration::from_secs(600)));
    }

    #[test]
    fn test_release_frees_the_key() {
        let lock = LocalLock::new();
        assert!(lock.acquire("dav_sync:a1", Duration::from_secs(600)));
        lock.release("dav_sync:a1");
        assert!(lock.acquire("dav_sync:a1", Duration::from_secs(600)));
    }

    #[test]
    fn test_different_keys_are_independent() {
        let lock = LocalLock::new();
        assert!(lock.acquire("dav_sync:a1", Duration::from_secs(600)));
        assert!(lock.acquire("git_sync:c1", Duration::from_secs(600)));
    }

    #[test]
    fn test_expired_entry_can_be_reacquired() {
        let lock = LocalLock::new();
        assert!(lock.acquire("dav_sync:a1", Duration::from_millis(0)));
        // TTL of zero expires immediately.
        assert!(lock.acquire("dav_sync:a1", Duration::from_secs(600)));
    }

    #[test]
    fn test_release_of_unknown_key_is_a_noop() {
        let lock = LocalLock::new();
        lock.release("never-acquired");
        assert!(lock.acquire("never-acquired", Duration::from_secs(600)));
    }
}
