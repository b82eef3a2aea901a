// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Access Orchestrator
//!
//! Sequences the gates for every custody operation.
//!
//! ## Download
//!
//! ```text
//! Received → Logged → SecondFactorChecked → IntegrityChecked → AnomalyChecked → Granted
//!               │              │                    │                 │
//!               └──────────────┴──── Denied(reason) ┴─────────────────┘ → CleanedUp
//! ```
//!
//! The ledger entry is committed before any gate runs, and every terminal
//! state is written back as the entry's outcome.
//!
//! ## Upload
//!
//! encrypt + fingerprint into staging → anchor (idempotent) → blob put →
//! metadata persist. Partial failures after anchoring raise alerts.

pub mod download;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::task::JoinError;

pub use download::{DownloadGrant, DownloadRequest, PlaintextStream};
pub use upload::{UploadReceipt, UploadSession};

use crate::anchor::{AnchorError, IntegrityAnchor};
use crate::anomaly::rules::window_start;
use crate::anomaly::{AnomalyGate, ClassifierError};
use crate::crypto::{self, CryptoError, EncryptionKey};
use crate::second_factor::{self, IssuedSecret, SecondFactorError, SecondFactorGate};
use crate::storage::{
    AccessAttempt, AccessLedger, AccessLedgerError, AccessLogEntry, AlertEvent, AlertLog,
    BlobStore, DenialReason, FileRecord, FileRepository, LocalStorage, StagingArea, StorageError,
};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    Denied(DenialReason),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("ledger unavailable: {0}")]
    Ledger(String),

    #[error("anomaly classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CustodyError {
    /// Short machine-readable kind, recorded as the outcome of failed attempts.
    pub fn kind(&self) -> &'static str {
        match self {
            CustodyError::Validation(_) => "validation",
            CustodyError::NotFound(_) => "not_found",
            CustodyError::Denied(reason) => reason.as_str(),
            CustodyError::Storage(_) => "storage",
            CustodyError::Ledger(_) => "ledger",
            CustodyError::ClassifierUnavailable(_) => "classifier_unavailable",
            CustodyError::Crypto(_) => "crypto",
            CustodyError::Internal(_) => "internal",
        }
    }
}

impl From<StorageError> for CustodyError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => CustodyError::NotFound(what),
            StorageError::Sealing(msg) => CustodyError::Crypto(msg),
            other => CustodyError::Storage(other.to_string()),
        }
    }
}

impl From<AccessLedgerError> for CustodyError {
    fn from(e: AccessLedgerError) -> Self {
        match e {
            AccessLedgerError::NotFound(what) => CustodyError::NotFound(what),
            AccessLedgerError::InvalidEntry(msg) => CustodyError::Validation(msg),
            other => CustodyError::Ledger(other.to_string()),
        }
    }
}

impl From<AnchorError> for CustodyError {
    fn from(e: AnchorError) -> Self {
        match e {
            AnchorError::InvalidFingerprint => CustodyError::Validation(e.to_string()),
            other => CustodyError::Ledger(other.to_string()),
        }
    }
}

impl From<ClassifierError> for CustodyError {
    fn from(e: ClassifierError) -> Self {
        CustodyError::ClassifierUnavailable(e.to_string())
    }
}

impl From<CryptoError> for CustodyError {
    fn from(e: CryptoError) -> Self {
        CustodyError::Crypto(e.to_string())
    }
}

impl From<SecondFactorError> for CustodyError {
    fn from(e: SecondFactorError) -> Self {
        match e {
            SecondFactorError::Storage(inner) => inner.into(),
            SecondFactorError::ProofRequired => {
                CustodyError::Denied(DenialReason::InvalidSecondFactor)
            }
            other => CustodyError::Internal(other.to_string()),
        }
    }
}

impl From<JoinError> for CustodyError {
    fn from(e: JoinError) -> Self {
        CustodyError::Internal(format!("blocking task failed: {e}"))
    }
}

pub type CustodyResult<T> = Result<T, CustodyError>;

/// Run blocking work (redb, filesystem) on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> CustodyResult<T>
where
    F: FnOnce() -> CustodyResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

// =============================================================================
// Access States
// =============================================================================

/// Download state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Received,
    Logged,
    SecondFactorChecked,
    IntegrityChecked,
    AnomalyChecked,
    Granted,
    Denied(DenialReason),
    CleanedUp,
}

/// Tracks and logs transitions for one attempt.
#[derive(Debug)]
pub(crate) struct AccessTrace {
    sequence: Option<u64>,
    state: AccessState,
}

impl AccessTrace {
    pub(crate) fn new() -> Self {
        Self {
            sequence: None,
            state: AccessState::Received,
        }
    }

    pub(crate) fn logged(&mut self, sequence: u64) {
        self.sequence = Some(sequence);
        self.advance(AccessState::Logged);
    }

    pub(crate) fn advance(&mut self, next: AccessState) {
        tracing::debug!(
            sequence = self.sequence.unwrap_or(0),
            from = ?self.state,
            to = ?next,
            "Access state transition"
        );
        self.state = next;
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Sub-key label for file payloads.
pub const FILE_KEY_LABEL: &str = "custody/files/v1";

/// Sub-key label for sealed second-factor secrets.
pub const CREDENTIAL_KEY_LABEL: &str = "custody/credentials/v1";

/// Everything the orchestrator coordinates.
pub struct CustodyComponents {
    pub storage: Arc<LocalStorage>,
    pub ledger: Arc<AccessLedger>,
    pub second_factor: Arc<SecondFactorGate>,
    pub anchor: Arc<dyn IntegrityAnchor>,
    pub anomaly: AnomalyGate,
    pub blobs: Arc<dyn BlobStore>,
    pub staging: StagingArea,
    pub alerts: Arc<AlertLog>,
    pub file_key: EncryptionKey,
}

/// Coordinates uploads, downloads and the verification queries.
pub struct AccessOrchestrator {
    storage: Arc<LocalStorage>,
    ledger: Arc<AccessLedger>,
    second_factor: Arc<SecondFactorGate>,
    anchor: Arc<dyn IntegrityAnchor>,
    anomaly: AnomalyGate,
    blobs: Arc<dyn BlobStore>,
    staging: StagingArea,
    alerts: Arc<AlertLog>,
    file_key: EncryptionKey,
}

impl AccessOrchestrator {
    pub fn new(components: CustodyComponents) -> Self {
        let CustodyComponents {
            storage,
            ledger,
            second_factor,
            anchor,
            anomaly,
            blobs,
            staging,
            alerts,
            file_key,
        } = components;
        Self {
            storage,
            ledger,
            second_factor,
            anchor,
            anomaly,
            blobs,
            staging,
            alerts,
            file_key,
        }
    }

    pub fn ledger(&self) -> &Arc<AccessLedger> {
        &self.ledger
    }

    pub fn alert_log(&self) -> &Arc<AlertLog> {
        &self.alerts
    }

    pub fn anchor_backend(&self) -> &'static str {
        self.anchor.backend()
    }

    pub fn blob_backend(&self) -> &'static str {
        self.blobs.backend()
    }

    pub(crate) async fn load_record(&self, file_id: &str) -> CustodyResult<FileRecord> {
        validate_file_id(file_id)?;
        let storage = Arc::clone(&self.storage);
        let file_id = file_id.to_string();
        blocking(move || Ok(FileRepository::new(&storage).get(&file_id)?)).await
    }

    // -------------------------------------------------------------------------
    // Verification queries
    // -------------------------------------------------------------------------

    /// Whether the file's recorded fingerprint is anchored.
    pub async fn verify_ownership(&self, file_id: &str) -> CustodyResult<bool> {
        let record = self.load_record(file_id).await?;
        Ok(self.anchor.is_anchored(&record.fingerprint).await?)
    }

    /// Whether the file's fingerprint is anchored and the stored blob still
    /// hashes to it.
    pub async fn verify_integrity(&self, file_id: &str) -> CustodyResult<bool> {
        let record = self.load_record(file_id).await?;
        if !self.anchor.is_anchored(&record.fingerprint).await? {
            tracing::warn!(file_id, "Integrity check: fingerprint not anchored");
            return Ok(false);
        }

        let staged = self.staging.allocate("verify.enc");
        match self.fetch_and_fingerprint(&record, staged.path()).await? {
            Some(actual) if actual == record.fingerprint => Ok(true),
            Some(_) => {
                tracing::warn!(file_id, "Integrity check: fingerprint mismatch");
                Ok(false)
            }
            None => {
                tracing::warn!(file_id, "Integrity check: blob missing");
                Ok(false)
            }
        }
    }

    /// Fetch the blob into `destination` and fingerprint it.
    /// Returns `None` if the blob does not exist.
    pub(crate) async fn fetch_and_fingerprint(
        &self,
        record: &FileRecord,
        destination: &std::path::Path,
    ) -> CustodyResult<Option<String>> {
        let blobs = Arc::clone(&self.blobs);
        let key = record.storage_key.clone();
        let destination = destination.to_path_buf();
        blocking(move || {
            match blobs.fetch(&key, &destination) {
                Ok(_) => {}
                Err(StorageError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let actual = crypto::fingerprint_file(&destination)
                .map_err(|e| CustodyError::Storage(e.to_string()))?;
            Ok(Some(actual))
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Second factor
    // -------------------------------------------------------------------------

    /// Issue a secret. Rotating an active one needs `current_code`.
    pub async fn issue_second_factor(
        &self,
        user_id: &str,
        current_code: Option<&str>,
    ) -> CustodyResult<IssuedSecret> {
        validate_user_id(user_id)?;
        let gate = Arc::clone(&self.second_factor);
        let user_id = user_id.to_string();
        let current_code = current_code.map(str::to_string);
        blocking(move || Ok(gate.issue(&user_id, current_code.as_deref())?)).await
    }

    /// Stateless check of a code against a caller-supplied secret.
    pub fn verify_second_factor(&self, code: &str, secret: &str) -> bool {
        second_factor::verify(code, secret)
    }

    pub async fn revoke_second_factor(&self, user_id: &str, code: &str) -> CustodyResult<()> {
        validate_user_id(user_id)?;
        let gate = Arc::clone(&self.second_factor);
        let user_id = user_id.to_string();
        let code = code.to_string();
        blocking(move || Ok(gate.revoke(&user_id, &code)?)).await
    }

    // -------------------------------------------------------------------------
    // Ledger and alerts
    // -------------------------------------------------------------------------

    /// Record an access event reported by a client.
    ///
    /// The timestamp must fall inside the anomaly lookback, so reported
    /// events cannot be back-dated into history the rules have already seen.
    pub async fn log_access(&self, attempt: AccessAttempt) -> CustodyResult<AccessLogEntry> {
        validate_user_id(&attempt.user_id)?;
        validate_ip(&attempt.ip)?;
        if attempt.file_id.is_empty() {
            return Err(CustodyError::Validation("fileId is required".to_string()));
        }
        let now = chrono::Utc::now();
        if attempt.timestamp > now + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(CustodyError::Validation("timestamp is in the future".to_string()));
        }
        let earliest = window_start(now, self.anomaly.rules().thresholds().lookback());
        if attempt.timestamp < earliest {
            return Err(CustodyError::Validation(
                "timestamp is older than the anomaly lookback".to_string(),
            ));
        }
        let ledger = Arc::clone(&self.ledger);
        blocking(move || Ok(ledger.record(attempt)?)).await
    }

    pub async fn access_log(&self, user_id: &str, window: Duration) -> CustodyResult<Vec<AccessLogEntry>> {
        validate_user_id(user_id)?;
        let ledger = Arc::clone(&self.ledger);
        let user_id = user_id.to_string();
        blocking(move || Ok(ledger.recent_entries(&user_id, window)?)).await
    }

    /// Append an alert from async code. The alert log fsyncs, so the write
    /// runs on the blocking pool.
    pub(crate) async fn raise_alert(&self, alert: AlertEvent) {
        let alerts = Arc::clone(&self.alerts);
        let kind = alert.kind;
        if let Err(e) = blocking(move || {
            alerts.raise(alert);
            Ok(())
        })
        .await
        {
            tracing::error!(kind = ?kind, error = %e, "Alert could not be written");
        }
    }

    pub async fn alerts(&self, from: NaiveDate, to: NaiveDate) -> CustodyResult<Vec<AlertEvent>> {
        if from > to {
            return Err(CustodyError::Validation("from must not be after to".to_string()));
        }
        let alerts = Arc::clone(&self.alerts);
        blocking(move || Ok(alerts.read_events_range(from, to)?)).await
    }

    /// Readiness probe: data volume writable and ledger readable.
    pub async fn check_ready(&self) -> CustodyResult<u64> {
        let storage = Arc::clone(&self.storage);
        let ledger = Arc::clone(&self.ledger);
        blocking(move || {
            storage.health_check()?;
            Ok(ledger.len()?)
        })
        .await
    }
}

// =============================================================================
// Validation
// =============================================================================

const MAX_USER_ID_LEN: usize = 256;

/// Tolerance for client-reported timestamps ahead of the server clock.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

pub(crate) fn validate_user_id(user_id: &str) -> CustodyResult<()> {
    if user_id.trim().is_empty() {
        return Err(CustodyError::Validation("userId is required".to_string()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(CustodyError::Validation("userId is too long".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_file_id(file_id: &str) -> CustodyResult<()> {
    uuid::Uuid::parse_str(file_id)
        .map(|_| ())
        .map_err(|_| CustodyError::Validation("fileId must be a UUID".to_string()))
}

pub(crate) fn validate_ip(ip: &str) -> CustodyResult<()> {
    ip.parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| CustodyError::Validation("ip must be an IP address".to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::anchor::LocalAnchorRegistry;
    use crate::anomaly::AnomalyRules;
    use crate::storage::{FsBlobStore, StoragePaths};
    use tempfile::TempDir;

    pub(crate) struct Harness {
        pub _temp: TempDir,
        pub orchestrator: AccessOrchestrator,
        pub paths: StoragePaths,
    }

    pub(crate) fn harness() -> Harness {
        harness_with(AnomalyGate::new(AnomalyRules::default()))
    }

    pub(crate) fn harness_with(anomaly: AnomalyGate) -> Harness {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let mut storage = LocalStorage::new(paths.clone());
        storage.initialize().unwrap();

        let master = EncryptionKey::generate().unwrap();
        let storage = Arc::new(storage);
        let second_factor = SecondFactorGate::new(
            (*storage).clone(),
            master.derive(CREDENTIAL_KEY_LABEL).unwrap(),
            "Custody",
        );

        let orchestrator = AccessOrchestrator::new(CustodyComponents {
            storage,
            ledger: Arc::new(AccessLedger::open(&paths.access_ledger_db()).unwrap()),
            second_factor: Arc::new(second_factor),
            anchor: Arc::new(LocalAnchorRegistry::open(&paths.anchor_registry_db()).unwrap()),
            anomaly,
            blobs: Arc::new(FsBlobStore::new(paths.bucket_dir())),
            staging: StagingArea::new(paths.staging_dir()),
            alerts: Arc::new(AlertLog::new(paths.clone())),
            file_key: master.derive(FILE_KEY_LABEL).unwrap(),
        });

        Harness {
            _temp: temp,
            orchestrator,
            paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(CustodyError::Denied(DenialReason::InvalidSecondFactor).kind(), "invalid_2fa");
        assert_eq!(CustodyError::Storage("x".into()).kind(), "storage");
        assert_eq!(
            CustodyError::from(StorageError::NotFound("File x".into())).kind(),
            "not_found"
        );
    }

    #[test]
    fn validation_helpers() {
        assert!(validate_file_id(&uuid::Uuid::new_v4().to_string()).is_ok());
        assert!(validate_file_id("../etc/passwd").is_err());
        assert!(validate_ip("10.0.0.1").is_ok());
        assert!(validate_ip("::1").is_ok());
        assert!(validate_ip("not-an-ip").is_err());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id(&"u".repeat(300)).is_err());
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let h = harness();
        let id = uuid::Uuid::new_v4().to_string();
        assert!(matches!(
            h.orchestrator.verify_ownership(&id).await,
            Err(CustodyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn log_access_appends_to_ledger() {
        let h = harness();
        let entry = h
            .orchestrator
            .log_access(AccessAttempt::now("alice", "file-1", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(entry.sequence, 1);

        let log = h
            .orchestrator
            .access_log("alice", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn log_access_rejects_future_timestamps() {
        let h = harness();
        let mut attempt = AccessAttempt::now("alice", "file-1", "10.0.0.1");
        attempt.timestamp += chrono::Duration::hours(1);
        assert!(matches!(
            h.orchestrator.log_access(attempt).await,
            Err(CustodyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn log_access_rejects_backdated_timestamps() {
        let h = harness();
        let lookback = h.orchestrator.anomaly.rules().thresholds().lookback();

        let mut stale = AccessAttempt::now("alice", "file-1", "10.0.0.1");
        stale.timestamp -= chrono::Duration::from_std(lookback).unwrap() + chrono::Duration::seconds(60);
        assert!(matches!(
            h.orchestrator.log_access(stale).await,
            Err(CustodyError::Validation(_))
        ));
        assert_eq!(h.orchestrator.ledger().len().unwrap(), 0);

        let mut recent = AccessAttempt::now("alice", "file-1", "10.0.0.1");
        recent.timestamp -= chrono::Duration::seconds(30);
        assert!(h.orchestrator.log_access(recent).await.is_ok());
    }

    #[tokio::test]
    async fn alerts_range_must_be_ordered() {
        let h = harness();
        let today = chrono::Utc::now().date_naive();
        assert!(h.orchestrator.alerts(today, today).await.unwrap().is_empty());
        assert!(matches!(
            h.orchestrator.alerts(today, today - chrono::Duration::days(1)).await,
            Err(CustodyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn ready_probe_reports_ledger_size() {
        let h = harness();
        assert_eq!(h.orchestrator.check_ready().await.unwrap(), 0);
    }
}
