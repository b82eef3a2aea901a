// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the custody data volume.

use std::path::{Path, PathBuf};

/// Default base directory for all persistent custody data.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities for the data volume.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== File Record Paths ==========

    /// Directory containing all file records.
    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    /// Path to a specific file record.
    pub fn file_record(&self, file_id: &str) -> PathBuf {
        self.files_dir().join(format!("{file_id}.json"))
    }

    // ========== Second-Factor Credential Paths ==========

    /// Directory containing sealed second-factor credentials.
    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join("credentials")
    }

    /// Path to a credential, keyed by a filesystem-safe principal key.
    pub fn credential(&self, principal_key: &str) -> PathBuf {
        self.credentials_dir().join(format!("{principal_key}.json"))
    }

    // ========== Blob Bucket Paths ==========

    /// Root of the directory-backed blob bucket.
    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join("bucket")
    }

    /// Bucket key for an encrypted payload.
    pub fn blob_key(file_id: &str) -> String {
        format!("secure/{file_id}.enc")
    }

    // ========== Staging Paths ==========

    /// Scratch directory for in-flight encrypted payloads.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    // ========== Ledger Paths ==========

    /// Directory containing embedded databases.
    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join("ledger")
    }

    /// Access ledger database file.
    pub fn access_ledger_db(&self) -> PathBuf {
        self.ledger_dir().join("access.redb")
    }

    /// Local anchor registry database file.
    pub fn anchor_registry_db(&self) -> PathBuf {
        self.ledger_dir().join("anchors.redb")
    }

    // ========== Alert Log Paths ==========

    /// Directory containing alert logs.
    pub fn alerts_dir(&self) -> PathBuf {
        self.root.join("alerts")
    }

    /// Directory for a specific date's alerts.
    pub fn alerts_date_dir(&self, date: &str) -> PathBuf {
        self.alerts_dir().join(date)
    }

    /// Path to a daily alerts file (JSONL format).
    pub fn alerts_file(&self, date: &str) -> PathBuf {
        self.alerts_date_dir(date).join("alerts.jsonl")
    }
}
