// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only access ledger backed by redb (pure Rust, ACID).
//!
//! Every access attempt is one entry, written in its own write transaction
//! and durable once `record` returns. Entries are never updated or deleted;
//! the final outcome of an attempt is a separate write-once annotation.
//!
//! ## Table Layout
//!
//! - `access_log`: sequence → serialized AccessLogEntry (as first recorded)
//! - `access_by_user`: `len(user) | user | timestamp_ms BE | sequence BE` → sequence
//! - `access_by_time`: `timestamp_ms BE | sequence BE` → sequence
//! - `access_outcomes`: sequence → serialized AccessOutcome (write-once)

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Table Definitions
// =============================================================================

const ACCESS_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("access_log");

const ACCESS_BY_USER: TableDefinition<&[u8], u64> = TableDefinition::new("access_by_user");

const ACCESS_BY_TIME: TableDefinition<&[u8], u64> = TableDefinition::new("access_by_time");

const ACCESS_OUTCOMES: TableDefinition<u64, &[u8]> = TableDefinition::new("access_outcomes");

// =============================================================================
// Entry Types
// =============================================================================

/// Why a gate refused an access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    #[serde(rename = "invalid_2fa")]
    InvalidSecondFactor,
    IntegrityCompromised,
    SuspiciousActivity,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::InvalidSecondFactor => "invalid_2fa",
            DenialReason::IntegrityCompromised => "integrity_compromised",
            DenialReason::SuspiciousActivity => "suspicious_activity",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution status of an access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    /// Logged, not (yet) resolved
    Attempted,
    Granted,
    Denied,
    /// Aborted by an error rather than a gate
    Failed,
}

/// Outcome of an access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessOutcome {
    pub status: AccessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AccessOutcome {
    pub fn attempted() -> Self {
        Self {
            status: AccessStatus::Attempted,
            reason: None,
        }
    }

    pub fn granted() -> Self {
        Self {
            status: AccessStatus::Granted,
            reason: None,
        }
    }

    pub fn denied(reason: DenialReason) -> Self {
        Self {
            status: AccessStatus::Denied,
            reason: Some(reason.as_str().to_string()),
        }
    }

    pub fn failed(kind: impl Into<String>) -> Self {
        Self {
            status: AccessStatus::Failed,
            reason: Some(kind.into()),
        }
    }

    /// Whether this outcome is a denial for the given reason.
    pub fn is_denial(&self, reason: DenialReason) -> bool {
        self.status == AccessStatus::Denied && self.reason.as_deref() == Some(reason.as_str())
    }
}

/// An access attempt to be recorded.
#[derive(Debug, Clone)]
pub struct AccessAttempt {
    pub user_id: String,
    pub file_id: String,
    pub ip: String,
    pub timestamp: DateTime<Utc>,
}

impl AccessAttempt {
    /// An attempt happening now.
    pub fn now(user_id: impl Into<String>, file_id: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            file_id: file_id.into(),
            ip: ip.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A recorded access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    /// Ledger position (1-based, strictly increasing).
    pub sequence: u64,
    pub user_id: String,
    pub file_id: String,
    pub ip: String,
    pub timestamp: DateTime<Utc>,
    /// Resolution, merged from the outcome annotation on read.
    pub outcome: AccessOutcome,
}

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccessLedgerError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

pub type AccessLedgerResult<T> = Result<T, AccessLedgerError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

fn timestamp_key(timestamp: DateTime<Utc>) -> u64 {
    timestamp.timestamp_millis().max(0) as u64
}

fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(2 + user_id.len() + 16);
    prefix.extend_from_slice(&(user_id.len() as u16).to_be_bytes());
    prefix.extend_from_slice(user_id.as_bytes());
    prefix
}

/// `len(user) | user | timestamp BE | sequence BE`; the length prefix keeps
/// one user's range from covering another user whose id extends it.
fn user_key(user_id: &str, timestamp_ms: u64, sequence: u64) -> Vec<u8> {
    let mut key = user_prefix(user_id);
    key.extend_from_slice(&timestamp_ms.to_be_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn time_key(timestamp_ms: u64, sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&timestamp_ms.to_be_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

// =============================================================================
// AccessLedger
// =============================================================================

/// Append-only ledger of access attempts.
pub struct AccessLedger {
    db: Database,
}

impl AccessLedger {
    /// Open (or create) the ledger at the given path.
    pub fn open(path: &Path) -> AccessLedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCESS_LOG)?;
            let _ = write_txn.open_table(ACCESS_BY_USER)?;
            let _ = write_txn.open_table(ACCESS_BY_TIME)?;
            let _ = write_txn.open_table(ACCESS_OUTCOMES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append an attempt. The entry is committed before this returns.
    pub fn record(&self, attempt: AccessAttempt) -> AccessLedgerResult<AccessLogEntry> {
        if attempt.user_id.is_empty() || attempt.user_id.len() > u16::MAX as usize {
            return Err(AccessLedgerError::InvalidEntry(
                "user id must be 1..=65535 bytes".to_string(),
            ));
        }
        let timestamp_ms = timestamp_key(attempt.timestamp);

        let write_txn = self.db.begin_write()?;
        let entry = {
            let mut log = write_txn.open_table(ACCESS_LOG)?;
            let sequence = match log.last()? {
                Some((last, _)) => last.value() + 1,
                None => 1,
            };

            let entry = AccessLogEntry {
                sequence,
                user_id: attempt.user_id,
                file_id: attempt.file_id,
                ip: attempt.ip,
                timestamp: attempt.timestamp,
                outcome: AccessOutcome::attempted(),
            };
            let json = serde_json::to_vec(&entry)?;
            log.insert(sequence, json.as_slice())?;

            let mut by_user = write_txn.open_table(ACCESS_BY_USER)?;
            let key = user_key(&entry.user_id, timestamp_ms, sequence);
            by_user.insert(key.as_slice(), sequence)?;

            let mut by_time = write_txn.open_table(ACCESS_BY_TIME)?;
            let key = time_key(timestamp_ms, sequence);
            by_time.insert(key.as_slice(), sequence)?;

            entry
        };
        write_txn.commit()?;
        Ok(entry)
    }

    /// Attach the final outcome to an entry.
    ///
    /// Write-once: returns `false` without changing anything if the entry
    /// already has an outcome.
    pub fn resolve(&self, sequence: u64, outcome: &AccessOutcome) -> AccessLedgerResult<bool> {
        let json = serde_json::to_vec(outcome)?;

        let write_txn = self.db.begin_write()?;
        let written = {
            let log = write_txn.open_table(ACCESS_LOG)?;
            if log.get(sequence)?.is_none() {
                return Err(AccessLedgerError::NotFound(format!("Access entry {sequence}")));
            }

            let mut outcomes = write_txn.open_table(ACCESS_OUTCOMES)?;
            let already = outcomes.get(sequence)?.is_some();
            if !already {
                outcomes.insert(sequence, json.as_slice())?;
            }
            !already
        };
        write_txn.commit()?;
        Ok(written)
    }

    /// Entries for a user within the trailing `window`, oldest first.
    pub fn recent_entries(&self, user_id: &str, window: Duration) -> AccessLedgerResult<Vec<AccessLogEntry>> {
        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|span| Utc::now().checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.entries_for_user_since(user_id, since)
    }

    /// Entries for a user at or after `since`, oldest first.
    pub fn entries_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> AccessLedgerResult<Vec<AccessLogEntry>> {
        let start = user_key(user_id, timestamp_key(since), 0);
        let end = user_key(user_id, u64::MAX, u64::MAX);

        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ACCESS_BY_USER)?;
        let log = read_txn.open_table(ACCESS_LOG)?;
        let outcomes = read_txn.open_table(ACCESS_OUTCOMES)?;

        let mut entries = Vec::new();
        for item in index.range(start.as_slice()..=end.as_slice())? {
            let (_, sequence) = item?;
            if let Some(entry) = load_entry(&log, &outcomes, sequence.value())? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Entries for all users at or after `since`, oldest first.
    pub fn entries_since(&self, since: DateTime<Utc>) -> AccessLedgerResult<Vec<AccessLogEntry>> {
        let start = time_key(timestamp_key(since), 0);

        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ACCESS_BY_TIME)?;
        let log = read_txn.open_table(ACCESS_LOG)?;
        let outcomes = read_txn.open_table(ACCESS_OUTCOMES)?;

        let mut entries = Vec::new();
        for item in index.range(start.as_slice()..)? {
            let (_, sequence) = item?;
            if let Some(entry) = load_entry(&log, &outcomes, sequence.value())? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Look up a single entry.
    pub fn get(&self, sequence: u64) -> AccessLedgerResult<Option<AccessLogEntry>> {
        let read_txn = self.db.begin_read()?;
        let log = read_txn.open_table(ACCESS_LOG)?;
        let outcomes = read_txn.open_table(ACCESS_OUTCOMES)?;
        load_entry(&log, &outcomes, sequence)
    }

    /// Total number of entries.
    pub fn len(&self) -> AccessLedgerResult<u64> {
        let read_txn = self.db.begin_read()?;
        let log = read_txn.open_table(ACCESS_LOG)?;
        Ok(log.len()?)
    }

    pub fn is_empty(&self) -> AccessLedgerResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn load_entry(
    log: &impl ReadableTable<u64, &'static [u8]>,
    outcomes: &impl ReadableTable<u64, &'static [u8]>,
    sequence: u64,
) -> AccessLedgerResult<Option<AccessLogEntry>> {
    let Some(raw) = log.get(sequence)? else {
        return Ok(None);
    };
    let mut entry: AccessLogEntry = serde_json::from_slice(raw.value())?;
    if let Some(outcome) = outcomes.get(sequence)? {
        entry.outcome = serde_json::from_slice(outcome.value())?;
    }
    Ok(Some(entry))
}
