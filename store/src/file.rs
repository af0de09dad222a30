use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::atomic_write::{ReplaceOptions, replace_file};
use crate::{Record, StateStore, StoreError, StoreFut, pick};

/// Store backed by a single JSON object on disk.
///
/// The whole document is held in memory and rewritten atomically on every
/// mutation. A write that fails leaves both the file and the in-memory copy
/// unchanged.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<Record>,
}

impl FileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    ///
    /// A file that is not a JSON object is moved aside to `<name>.corrupt` and
    /// the store starts empty; recovery then sees no scheduled work.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => parse_document(&path, &bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Record::new(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&self, next: &Record) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(next)?;
        replace_file(&self.path, &bytes, ReplaceOptions::private()).map_err(|source| {
            StoreError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn mutate(&self, apply: impl FnOnce(&mut Record)) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = data.clone();
        apply(&mut next);
        if next == *data {
            return Ok(());
        }
        self.commit(&next)?;
        *data = next;
        Ok(())
    }
}

fn parse_document(path: &Path, bytes: &[u8]) -> Record {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        _ => {
            let aside = path.with_extension("corrupt");
            match fs::rename(path, &aside) {
                Ok(()) => tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    "State file is not a JSON object; starting empty"
                ),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    "State file is not a JSON object and could not be moved aside: {e}"
                ),
            }
            Record::new()
        }
    }
}

impl StateStore for FileStore {
    fn get<'a>(&'a self, keys: &'a [&'a str]) -> StoreFut<'a, Record> {
        Box::pin(async move {
            let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(pick(&data, keys))
        })
    }

    fn set(&self, entries: Record) -> StoreFut<'_, ()> {
        Box::pin(async move { self.mutate(|data| data.extend(entries)) })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFut<'a, ()> {
        Box::pin(async move {
            self.mutate(|data| {
                for key in keys {
                    data.remove(*key);
                }
            })
        })
    }
}
