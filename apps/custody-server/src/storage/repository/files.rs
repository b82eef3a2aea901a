// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File record repository.
//!
//! ## Storage Layout
//!
//! ```text
//! /data/files/{file_id}.json   # FileRecord
//! ```
//!
//! Records are created once per successful upload and never rewritten: the
//! recorded fingerprint is the reference every later download is checked
//! against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::{LocalStorage, StorageError, StorageResult};

/// Metadata for one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FileRecord {
    /// Unique file identifier (UUID)
    pub file_id: String,
    /// Client-supplied file name, informational only
    pub filename: String,
    /// Location of the encrypted container in the bucket
    pub storage_key: String,
    /// SHA-256 of the stored ciphertext, lowercase hex
    pub fingerprint: String,
    /// Ciphertext size
    pub size_bytes: u64,
    /// Anchor transaction reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_tx: Option<String>,
    /// Principal that uploaded the file, if one was named
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Repository for file records.
pub struct FileRepository<'a> {
    storage: &'a LocalStorage,
}

impl<'a> FileRepository<'a> {
    pub fn new(storage: &'a LocalStorage) -> Self {
        Self { storage }
    }

    pub fn exists(&self, file_id: &str) -> bool {
        self.storage.exists(self.storage.paths().file_record(file_id))
    }

    /// Get a record by file ID.
    pub fn get(&self, file_id: &str) -> StorageResult<FileRecord> {
        let path = self.storage.paths().file_record(file_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("File {file_id}")));
        }
        self.storage.read_json(path)
    }

    /// Persist a new record.
    ///
    /// Returns `AlreadyExists` if a record with the same ID is present.
    pub fn create(&self, record: &FileRecord) -> StorageResult<()> {
        if self.exists(&record.file_id) {
            return Err(StorageError::AlreadyExists(format!("File {}", record.file_id)));
        }
        self.storage
            .write_json(self.storage.paths().file_record(&record.file_id), record)
    }

    /// All records, newest first.
    pub fn list_all(&self) -> StorageResult<Vec<FileRecord>> {
        let ids = self.storage.list_files(self.storage.paths().files_dir(), "json")?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(file_id = %id, error = %e, "Skipping unreadable file record"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalStorage) {
        let temp = TempDir::new().unwrap();
        let mut storage = LocalStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        (temp, storage)
    }

    fn record(id: &str) -> FileRecord {
        FileRecord {
            file_id: id.to_string(),
            filename: "report.pdf".to_string(),
            storage_key: StoragePaths::blob_key(id),
            fingerprint: "ab".repeat(32),
            size_bytes: 10,
            anchor_tx: Some("0xdeadbeef".to_string()),
            uploaded_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_get() {
        let (_temp, storage) = setup();
        let repo = FileRepository::new(&storage);

        repo.create(&record("f-1")).unwrap();
        let stored = repo.get("f-1").unwrap();
        assert_eq!(stored, record_with_time("f-1", stored.created_at));
    }

    fn record_with_time(id: &str, created_at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            created_at,
            ..record(id)
        }
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let (_temp, storage) = setup();
        let repo = FileRepository::new(&storage);

        repo.create(&record("f-1")).unwrap();
        assert!(matches!(
            repo.create(&record("f-1")),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn missing_record_is_not_found() {
        let (_temp, storage) = setup();
        let repo = FileRepository::new(&storage);
        assert!(matches!(repo.get("nope"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn list_all_returns_every_record() {
        let (_temp, storage) = setup();
        let repo = FileRepository::new(&storage);
        for i in 0..3 {
            repo.create(&record(&format!("f-{i}"))).unwrap();
        }
        assert_eq!(repo.list_all().unwrap().len(), 3);
    }
}
