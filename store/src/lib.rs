//! Durable key-value state for dnsgate.
//!
//! The controller keeps every timer deadline and cached lookup here, because the
//! process itself may be torn down at any moment. Stores expose a flat JSON
//! object: `get` returns the subset of requested keys that exist, `set` merges,
//! `remove` deletes. Each call is atomic on its own; nothing is transactional
//! across calls, so callers serialize their read-modify-write cycles.

mod atomic_write;
mod error;
mod file;
mod memory;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

pub use atomic_write::{ReplaceOptions, replace_file};
pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;

/// A partial view of the store: key to JSON value.
pub type Record = serde_json::Map<String, Value>;

pub type StoreFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

pub trait StateStore: Send + Sync {
    /// Values for those of `keys` that are present. Missing keys are omitted.
    fn get<'a>(&'a self, keys: &'a [&'a str]) -> StoreFut<'a, Record>;

    /// Merge `entries` into the store, overwriting existing keys.
    fn set(&self, entries: Record) -> StoreFut<'_, ()>;

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFut<'a, ()>;

    /// Single-key convenience over [`StateStore::get`].
    fn get_one<'a>(&'a self, key: &'a str) -> StoreFut<'a, Option<Value>> {
        Box::pin(async move {
            let mut record = self.get(std::slice::from_ref(&key)).await?;
            Ok(record.remove(key))
        })
    }

    /// Single-key convenience over [`StateStore::set`].
    fn set_one<'a>(&'a self, key: &'a str, value: Value) -> StoreFut<'a, ()> {
        let mut entries = Record::new();
        entries.insert(key.to_string(), value);
        self.set(entries)
    }
}

fn pick(data: &Record, keys: &[&str]) -> Record {
    keys.iter()
        .filter_map(|k| data.get(*k).map(|v| ((*k).to_string(), v.clone())))
        .collect()
}
