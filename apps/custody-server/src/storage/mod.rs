// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Everything the service persists lives under one data directory.
//!
//! ## Storage Layout
//!
//! ```text
//! /data/
//!   files/{file_id}.json              # FileRecord metadata
//!   credentials/{sha256(user)}.json   # Sealed second-factor secrets
//!   bucket/secure/{file_id}.enc       # Encrypted containers (blob store)
//!   staging/                          # In-flight payloads, purged on boot
//!   ledger/
//!     access.redb                     # Append-only access ledger
//!     anchors.redb                    # Local anchor registry
//!   alerts/{date}/alerts.jsonl        # Daily security alerts
//! ```
//!
//! Plaintext never reaches this module: payloads and secrets are sealed by
//! [`crate::crypto`] before they are written.

pub mod access_ledger;
pub mod alerts;
pub mod blob_store;
pub mod local_fs;
pub mod paths;
pub mod repository;
pub mod staging;

pub use access_ledger::{
    AccessAttempt, AccessLedger, AccessLedgerError, AccessLedgerResult, AccessLogEntry, AccessOutcome,
    AccessStatus, DenialReason,
};
pub use alerts::{AlertEvent, AlertKind, AlertLog, Severity};
pub use blob_store::{BlobStore, FsBlobStore};
pub use local_fs::{LocalStorage, StorageError, StorageResult};
pub use paths::StoragePaths;
pub use repository::{CredentialRepository, FileRecord, FileRepository, StoredCredential};
pub use staging::{StagedFile, StagingArea};
