//! # Tangle — Storage Facade
//!
//! The single entry point the rest of the node uses for persistence. It
//! owns an ordered list of [`PersistenceProvider`]s and gives every
//! operation a fixed multi-provider policy:
//!
//! - **Reads** (`load`, `first`, `latest`, `next`, `previous`) try each
//!   provider in order and return the first hit.
//! - **Writes** (`save`, `save_batch`, `delete`) go to every provider. The
//!   result reported is the first provider's; an error from any provider
//!   fails the call.
//! - **Existence** (`exists`, `may_exist`) is `true` if any provider says so.
//! - **Aggregates** (`count`, `keys_starting_with`,
//!   `keys_with_missing_references`) return the first non-empty answer.
//!
//! ## Async model
//!
//! Providers block. Each facade call schedules the provider work on tokio's
//! blocking pool immediately and hands back a boxed future for the result,
//! so callers can fire several lookups and await them together. The facade
//! adds no locking of its own; providers are expected to be thread-safe.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use super::provider::{
    Entry, Indexable, Partition, PersistenceProvider, StorageError, StorageResult, WriteBatch,
};

/// Future returned by every facade operation.
pub type StorageFuture<T> = BoxFuture<'static, StorageResult<T>>;

type Providers = Arc<[Arc<dyn PersistenceProvider>]>;

/// Multi-provider storage facade. Cheap to clone.
#[derive(Clone)]
pub struct Tangle {
    providers: Providers,
}

impl std::fmt::Debug for Tangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("Tangle").field("providers", &names).finish()
    }
}

impl Tangle {
    /// Builds a facade over `providers`, consulted in the given order.
    pub fn new(providers: Vec<Arc<dyn PersistenceProvider>>) -> Self {
        Self {
            providers: providers.into(),
        }
    }

    /// Runs `op` against the provider list on the blocking pool.
    fn run<T, F>(&self, op: F) -> StorageFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&[Arc<dyn PersistenceProvider>]) -> StorageResult<T> + Send + 'static,
    {
        let providers = Arc::clone(&self.providers);
        let handle = tokio::task::spawn_blocking(move || {
            if providers.is_empty() {
                return Err(StorageError::NoProviders);
            }
            op(&providers)
        });
        async move {
            handle
                .await
                .map_err(|e| StorageError::Task(e.to_string()))?
        }
        .boxed()
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Initializes every provider in order. Any failure is fatal to the
    /// caller: a node cannot run on partial storage.
    pub fn init(&self) -> StorageFuture<()> {
        self.run(|providers| {
            for provider in providers {
                provider.init()?;
                info!(provider = provider.name(), "persistence provider initialized");
            }
            Ok(())
        })
    }

    /// Shuts every provider down. All providers are attempted; the first
    /// error is returned.
    pub fn shutdown(&self) -> StorageFuture<()> {
        self.run(|providers| {
            let mut first_error = None;
            for provider in providers {
                match provider.shutdown() {
                    Ok(()) => debug!(provider = provider.name(), "persistence provider stopped"),
                    Err(e) => {
                        warn!(provider = provider.name(), error = %e, "provider shutdown failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    // -- Reads --------------------------------------------------------------

    /// Loads the value under `key`, falling back through providers.
    pub fn load<K: Indexable>(&self, partition: Partition, key: &K) -> StorageFuture<Option<Vec<u8>>> {
        let key = key.bytes();
        self.run(move |providers| {
            for provider in providers {
                if let Some(value) = provider.get(partition, &key)? {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        })
    }

    /// Raw-key variant of [`Tangle::load`] for composite keys.
    pub fn load_raw(&self, partition: Partition, key: Vec<u8>) -> StorageFuture<Option<Vec<u8>>> {
        self.run(move |providers| {
            for provider in providers {
                if let Some(value) = provider.get(partition, &key)? {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        })
    }

    pub fn first(&self, partition: Partition) -> StorageFuture<Option<Entry>> {
        self.navigate(move |provider| provider.first(partition))
    }

    pub fn latest(&self, partition: Partition) -> StorageFuture<Option<Entry>> {
        self.navigate(move |provider| provider.latest(partition))
    }

    /// Entry with the smallest key strictly after `key`.
    pub fn next<K: Indexable>(&self, partition: Partition, key: &K) -> StorageFuture<Option<Entry>> {
        let key = key.bytes();
        self.navigate(move |provider| provider.next(partition, &key))
    }

    /// Entry with the largest key strictly before `key`.
    pub fn previous<K: Indexable>(
        &self,
        partition: Partition,
        key: &K,
    ) -> StorageFuture<Option<Entry>> {
        let key = key.bytes();
        self.navigate(move |provider| provider.previous(partition, &key))
    }

    fn navigate<F>(&self, op: F) -> StorageFuture<Option<Entry>>
    where
        F: Fn(&dyn PersistenceProvider) -> StorageResult<Option<Entry>> + Send + 'static,
    {
        self.run(move |providers| {
            for provider in providers {
                if let Some(entry) = op(provider.as_ref())? {
                    return Ok(Some(entry));
                }
            }
            Ok(None)
        })
    }

    // -- Writes -------------------------------------------------------------

    /// Writes to every provider; reports the first provider's result.
    pub fn save<K: Indexable>(
        &self,
        partition: Partition,
        key: &K,
        value: Vec<u8>,
    ) -> StorageFuture<bool> {
        self.save_raw(partition, key.bytes(), value)
    }

    /// Raw-key variant of [`Tangle::save`] for composite keys.
    pub fn save_raw(&self, partition: Partition, key: Vec<u8>, value: Vec<u8>) -> StorageFuture<bool> {
        self.run(move |providers| {
            let mut reported = None;
            for provider in providers {
                let saved = provider.save(partition, &key, &value)?;
                reported.get_or_insert(saved);
            }
            Ok(reported.unwrap_or(false))
        })
    }

    /// Applies `batch` on every provider; reports the first provider's result.
    pub fn save_batch(&self, batch: WriteBatch) -> StorageFuture<bool> {
        self.run(move |providers| {
            let mut reported = None;
            for provider in providers {
                let saved = provider.save_batch(&batch)?;
                reported.get_or_insert(saved);
            }
            Ok(reported.unwrap_or(false))
        })
    }

    pub fn delete<K: Indexable>(&self, partition: Partition, key: &K) -> StorageFuture<()> {
        let key = key.bytes();
        self.run(move |providers| {
            for provider in providers {
                provider.delete(partition, &key)?;
            }
            Ok(())
        })
    }

    // -- Existence ----------------------------------------------------------

    pub fn exists<K: Indexable>(&self, partition: Partition, key: &K) -> StorageFuture<bool> {
        let key = key.bytes();
        self.run(move |providers| {
            for provider in providers {
                if provider.exists(partition, &key)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Approximate existence: may report `true` for absent keys.
    pub fn may_exist<K: Indexable>(&self, partition: Partition, key: &K) -> StorageFuture<bool> {
        let key = key.bytes();
        self.run(move |providers| {
            for provider in providers {
                if provider.may_exist(partition, &key)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    // -- Aggregates ---------------------------------------------------------

    /// Entry count from the first provider that has any.
    pub fn count(&self, partition: Partition) -> StorageFuture<u64> {
        self.run(move |providers| {
            for provider in providers {
                let count = provider.count(partition)?;
                if count > 0 {
                    return Ok(count);
                }
            }
            Ok(0)
        })
    }

    /// Keys beginning with `prefix`, from the first provider that has any.
    pub fn keys_starting_with(
        &self,
        partition: Partition,
        prefix: Vec<u8>,
    ) -> StorageFuture<Vec<Vec<u8>>> {
        self.run(move |providers| {
            for provider in providers {
                let keys = provider.keys_starting_with(partition, &prefix)?;
                if !keys.is_empty() {
                    return Ok(keys);
                }
            }
            Ok(Vec::new())
        })
    }

    /// Keys with no entry in their reference partition, from the first
    /// provider that reports any.
    pub fn keys_with_missing_references(&self, partition: Partition) -> StorageFuture<Vec<Vec<u8>>> {
        self.run(move |providers| {
            for provider in providers {
                let keys = provider.keys_with_missing_references(partition)?;
                if !keys.is_empty() {
                    return Ok(keys);
                }
            }
            Ok(Vec::new())
        })
    }
}
