//! Async storage abstraction for swap record persistence.
//!
//! The intermediary persists every swap it mints and resumes from storage on
//! restart. Records are keyed by `(payment_hash, sequence)` and serialized as
//! JSON by the backend; durability is the backend's concern.

use crate::error::Result;
use crate::types::SwapIdentity;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;

/// Type alias for storage futures.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A swap record that can be persisted.
pub trait StoredSwap: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identity of this record; determines the storage key.
    fn identity(&self) -> SwapIdentity;
}

/// Typed storage trait for swap records.
///
/// Each handler owns one storage instance parameterized by its record type.
/// Deletes are final; there is no undelete.
pub trait SwapRecordStorage<T: StoredSwap>: Send + Sync {
    /// Load every stored record (startup reconciliation).
    fn load_all(&self) -> StorageFuture<'_, Vec<T>>;

    /// Get a record by identity.
    ///
    /// Returns `Ok(None)` if the record doesn't exist.
    fn get(&self, identity: &SwapIdentity) -> StorageFuture<'_, Option<T>>;

    /// Store a record, overwriting any record with the same identity.
    fn put(&self, record: &T) -> StorageFuture<'_, ()>;

    /// Remove a record by identity.
    ///
    /// Does nothing if the record doesn't exist.
    fn remove(&self, identity: &SwapIdentity) -> StorageFuture<'_, ()>;

    /// Return all records matching a predicate.
    fn query(&self, predicate: Box<dyn Fn(&T) -> bool + Send + Sync>)
    -> StorageFuture<'_, Vec<T>>;
}

/// In-memory storage implementation.
///
/// Reference implementation used by the test-suite; production deployments
/// plug in a durable backend behind the same trait.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// Simple in-memory swap record storage.
    pub struct MemorySwapStorage<T: StoredSwap> {
        data: RwLock<HashMap<String, T>>,
    }

    impl<T: StoredSwap> MemorySwapStorage<T> {
        /// Create a new empty storage.
        pub fn new() -> Self {
            Self {
                data: RwLock::new(HashMap::new()),
            }
        }

        /// Number of stored records.
        pub fn len(&self) -> usize {
            self.data.read().unwrap().len()
        }

        /// Whether the storage is empty.
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl<T: StoredSwap> Default for MemorySwapStorage<T> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T: StoredSwap> SwapRecordStorage<T> for MemorySwapStorage<T> {
        fn load_all(&self) -> StorageFuture<'_, Vec<T>> {
            Box::pin(async move {
                let data = self.data.read().unwrap();
                Ok(data.values().cloned().collect())
            })
        }

        fn get(&self, identity: &SwapIdentity) -> StorageFuture<'_, Option<T>> {
            let key = identity.storage_key();
            Box::pin(async move {
                let data = self.data.read().unwrap();
                Ok(data.get(&key).cloned())
            })
        }

        fn put(&self, record: &T) -> StorageFuture<'_, ()> {
            let key = record.identity().storage_key();
            let record = record.clone();
            Box::pin(async move {
                let mut data = self.data.write().unwrap();
                data.insert(key, record);
                Ok(())
            })
        }

        fn remove(&self, identity: &SwapIdentity) -> StorageFuture<'_, ()> {
            let key = identity.storage_key();
            Box::pin(async move {
                let mut data = self.data.write().unwrap();
                data.remove(&key);
                Ok(())
            })
        }

        fn query(
            &self,
            predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
        ) -> StorageFuture<'_, Vec<T>> {
            Box::pin(async move {
                let data = self.data.read().unwrap();
                Ok(data.values().filter(|r| predicate(r)).cloned().collect())
            })
        }
    }
}
