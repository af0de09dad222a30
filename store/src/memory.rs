use std::sync::{Mutex, PoisonError};

use crate::{Record, StateStore, StoreFut, pick};

/// Volatile store. Used by tests and when no state path is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Record>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record(data: Record) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Copy of everything currently stored.
    #[must_use]
    pub fn snapshot(&self) -> Record {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StateStore for MemoryStore {
    fn get<'a>(&'a self, keys: &'a [&'a str]) -> StoreFut<'a, Record> {
        Box::pin(async move {
            let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(pick(&data, keys))
        })
    }

    fn set(&self, entries: Record) -> StoreFut<'_, ()> {
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
            data.extend(entries);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFut<'a, ()> {
        Box::pin(async move {
            let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
            for key in keys {
                data.remove(*key);
            }
            Ok(())
        })
    }
}
