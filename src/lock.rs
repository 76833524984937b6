//! Per-swap locking with lease-based timeouts.
//!
//! Within one swap identity, side-effecting operations are serialized by a
//! lease lock. A holder that crashes simply lets its lease expire, after
//! which the watchdog can reclaim the swap. Contested locks are not awaited;
//! the caller skips the swap and retries on the next watchdog pass.

use crate::types::SwapIdentity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Mutex map keyed by swap identity.
#[derive(Clone, Default)]
pub struct SwapLockMap {
    inner: Arc<Mutex<HashMap<String, Lease>>>,
}

struct Lease {
    token: u64,
    expires_at: Instant,
}

/// Unlock token returned by a successful [`SwapLockMap::lock`].
///
/// Dropping the guard releases the lock, unless the lease already expired and
/// another holder reclaimed it.
pub struct SwapLock {
    map: Arc<Mutex<HashMap<String, Lease>>>,
    key: String,
    token: u64,
}

impl SwapLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the lock for `identity` with the given lease.
    ///
    /// Returns `None` when another unexpired holder owns the lock. The lease
    /// should equal the operation's maximum acceptable hold.
    pub fn lock(&self, identity: &SwapIdentity, lease: Duration) -> Option<SwapLock> {
        let key = identity.storage_key();
        let now = Instant::now();
        let mut map = self.inner.lock().unwrap();

        if let Some(existing) = map.get(&key) {
            if existing.expires_at > now {
                return None;
            }
        }

        let token = rand::random::<u64>();
        map.insert(
            key.clone(),
            Lease {
                token,
                expires_at: now + lease,
            },
        );

        Some(SwapLock {
            map: self.inner.clone(),
            key,
            token,
        })
    }

    /// Whether the lock for `identity` is currently held.
    pub fn is_locked(&self, identity: &SwapIdentity) -> bool {
        let key = identity.storage_key();
        let map = self.inner.lock().unwrap();
        map.get(&key)
            .map(|l| l.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

impl Drop for SwapLock {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap();
        // Only release if our lease is still the active one.
        if map.get(&self.key).map(|l| l.token) == Some(self.token) {
            map.remove(&self.key);
        }
    }
}
