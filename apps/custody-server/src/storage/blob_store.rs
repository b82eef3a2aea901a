// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Object storage for encrypted payloads.
//!
//! The bucket is an external collaborator addressed by storage key. Calls
//! are blocking; async callers run them on the blocking pool.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use super::{StorageError, StorageResult};

/// Narrow interface to the blob bucket.
pub trait BlobStore: Send + Sync {
    /// Upload the file at `source` under `key`, replacing any existing object.
    fn put(&self, key: &str, source: &Path) -> StorageResult<u64>;

    /// Download the object under `key` into `destination`.
    fn fetch(&self, key: &str, destination: &Path) -> StorageResult<u64>;

    /// Remove the object under `key`.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Whether an object exists under `key`.
    fn exists(&self, key: &str) -> bool;

    /// Backend name for health reporting.
    fn backend(&self) -> &'static str;
}

/// Directory-backed bucket.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a key to a path, refusing anything that could leave the bucket.
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, source: &Path) -> StorageResult<u64> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // Copy then rename so readers never observe a partial object
        let temp = target.with_extension(format!("{}.part", uuid::Uuid::new_v4().simple()));
        let copied = fs::copy(source, &temp)?;
        File::open(&temp)?.sync_all()?;
        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(copied)
    }

    fn fetch(&self, key: &str, destination: &Path) -> StorageResult<u64> {
        let source = self.resolve(key)?;
        match fs::copy(&source, destination) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("Object {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let target = self.resolve(key)?;
        fs::remove_file(target)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn backend(&self) -> &'static str {
        "filesystem"
    }
}
