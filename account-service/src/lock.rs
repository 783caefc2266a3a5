//! Reader/writer locks striped by account email

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A fixed set of reader/writer locks; each key always maps to the same one.
///
/// With a single stripe every key shares one lock, which serializes all
/// writers across all accounts.
pub struct StripedLock {
    stripes: Vec<RwLock<()>>,
}

impl StripedLock {
    /// Create a lock with `stripes` stripes (at least one)
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| RwLock::new(())).collect(),
        }
    }

    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false: a striped lock has at least one stripe
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Index of the stripe guarding `key`
    pub fn stripe_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Shared access to the stripe guarding `key`
    pub async fn read(&self, key: &str) -> RwLockReadGuard<'_, ()> {
        self.stripes[self.stripe_index(key)].read().await
    }

    /// Exclusive access to the stripe guarding `key`
    pub async fn write(&self, key: &str) -> RwLockWriteGuard<'_, ()> {
        self.stripes[self.stripe_index(key)].write().await
    }
}
