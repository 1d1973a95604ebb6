//! JSON file store for the persisted caches.
//!
//! Shared by the sender-cadence store and the thread-context cache. Reads
//! degrade to the empty state on missing or corrupt files; writes go through
//! a temp-file-then-rename replace so a crashed writer never leaves a
//! half-written cache behind.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{CacheError, Result};

/// File-backed JSON store for one cache value.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored value, falling back to `T::default()` when the file
    /// is missing or unreadable. Never fails.
    pub fn load_or_default<T>(&self) -> T
    where
        T: DeserializeOwned + Default,
    {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read cache file, starting empty");
                return T::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt cache file, starting empty");
                T::default()
            }
        }
    }

    /// Persist a value atomically: write to a sibling temp file, then rename
    /// over the target.
    pub fn store<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
        }

        let json = serde_json::to_string_pretty(value).map_err(|e| CacheError::WriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| self.write_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.write_error(e))?;
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> crate::error::Error {
        CacheError::WriteFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}
