// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Security alerts.
//!
//! Integrity failures, suspicious activity and partial-upload reconciliation
//! are appended to a daily JSONL alert log so they surface to operators
//! instead of disappearing into a denial response.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{StorageError, StoragePaths, StorageResult};

/// Kinds of alerts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A download found an unanchored or mismatched fingerprint
    IntegrityCompromised,
    /// The anomaly gate or the periodic sweep flagged activity
    SuspiciousActivity,
    /// A fingerprint was anchored but the upload did not complete
    AnchorOrphaned,
    /// A stored blob was removed because its metadata could not be persisted
    UploadRolledBack,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An alert log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AlertEvent {
    /// Unique alert ID.
    pub alert_id: String,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: AlertKind,
    /// How bad it is.
    pub severity: Severity,
    /// Principal involved (if known).
    pub user_id: Option<String>,
    /// File involved (if known).
    pub file_id: Option<String>,
    /// Source IP involved (if known).
    pub ip: Option<String>,
    /// Free-form context.
    pub details: Option<String>,
}

impl AlertEvent {
    /// Create a new alert with the kind's default severity.
    pub fn new(kind: AlertKind) -> Self {
        let severity = match kind {
            AlertKind::IntegrityCompromised => Severity::Critical,
            AlertKind::SuspiciousActivity => Severity::High,
            AlertKind::AnchorOrphaned | AlertKind::UploadRolledBack => Severity::Medium,
        };
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            severity,
            user_id: None,
            file_id: None,
            ip: None,
            details: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_file(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Append-only alert log.
pub struct AlertLog {
    paths: StoragePaths,
    write_lock: Mutex<()>,
}

impl AlertLog {
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an alert to the day's log file.
    pub fn record(&self, alert: &AlertEvent) -> StorageResult<()> {
        let date = alert.timestamp.format("%Y-%m-%d").to_string();
        let path = self.paths.alerts_file(&date);

        let mut line = serde_json::to_vec(alert)?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Io(std::io::Error::other("alert log lock poisoned")))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    /// Record an alert and emit it as a tracing event; failures are logged, not returned.
    pub fn raise(&self, alert: AlertEvent) {
        tracing::warn!(
            alert_id = %alert.alert_id,
            kind = ?alert.kind,
            severity = ?alert.severity,
            user_id = alert.user_id.as_deref().unwrap_or("-"),
            file_id = alert.file_id.as_deref().unwrap_or("-"),
            ip = alert.ip.as_deref().unwrap_or("-"),
            "Security alert raised"
        );
        if let Err(e) = self.record(&alert) {
            tracing::error!(error = %e, alert_id = %alert.alert_id, "Failed to persist alert");
        }
    }

    /// Read alerts for a specific date (`YYYY-MM-DD`).
    pub fn read_events(&self, date: &str) -> StorageResult<Vec<AlertEvent>> {
        let path = self.paths.alerts_file(date);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }

    /// Read alerts for an inclusive date range.
    pub fn read_events_range(&self, start: NaiveDate, end: NaiveDate) -> StorageResult<Vec<AlertEvent>> {
        let mut all = Vec::new();
        let mut current = start;
        while current <= end {
            all.extend(self.read_events(&current.format("%Y-%m-%d").to_string())?);
            current = current
                .succ_opt()
                .ok_or_else(|| StorageError::NotFound("Date overflow".to_string()))?;
        }
        Ok(all)
    }
}
