//! Shared file modification-time cache
//!
//! A file dependency is stat'ed the first time any task asks for it and the
//! result is reused by every later lookup. Entries are only dropped when a
//! watch loop observes a change to that exact path, so a build outside a watch
//! loop can see a timestamp recorded by an earlier build in the same process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::error::Result;
use crate::modtime::{file_mod_time, Timestamp};

/// Process-wide path -> modification time store, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ModTimeCache {
    entries: Arc<RwLock<HashMap<String, SystemTime>>>,
}

impl ModTimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached time for `path`, stat'ing the file on first use.
    ///
    /// A missing file is `Ok(None)` and is not cached.
    pub fn get(&self, path: &str) -> Result<Timestamp> {
        if let Some(t) = self.read().get(path) {
            return Ok(Some(*t));
        }

        let t = file_mod_time(path)?;
        if let Some(t) = t {
            self.write().entry(path.to_string()).or_insert(t);
        }
        Ok(t)
    }

    pub fn invalidate(&self, path: &str) {
        self.write().remove(path);
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read().contains_key(path)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SystemTime>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SystemTime>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
