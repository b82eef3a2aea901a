// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gated download.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{blocking, validate_file_id, validate_ip, validate_user_id};
use super::{AccessOrchestrator, AccessState, AccessTrace, CustodyError, CustodyResult};
use crate::crypto::{self, EncryptionKey, StreamDecryptor, HEADER_LEN};
use crate::second_factor::SecondFactorGate;
use crate::storage::{
    AccessAttempt, AccessOutcome, AlertEvent, AlertKind, DenialReason, FileRecord, StagedFile,
};

/// Frames buffered between the decryption task and the response body.
const STREAM_BUFFER_FRAMES: usize = 4;

/// A download request as received from the client.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub file_id: String,
    pub user_id: String,
    pub ip: String,
    pub otp_code: String,
}

/// Decrypted payload, produced frame by frame.
pub type PlaintextStream = ReceiverStream<io::Result<Vec<u8>>>;

/// A granted download.
pub struct DownloadGrant {
    pub sequence: u64,
    pub record: FileRecord,
    pub body: PlaintextStream,
}

impl std::fmt::Debug for DownloadGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadGrant")
            .field("sequence", &self.sequence)
            .field("file_id", &self.record.file_id)
            .finish_non_exhaustive()
    }
}

impl AccessOrchestrator {
    /// Run the download gates and, if all pass, stream the decrypted file.
    pub async fn download(&self, request: DownloadRequest) -> CustodyResult<DownloadGrant> {
        let mut trace = AccessTrace::new();

        validate_user_id(&request.user_id)?;
        validate_ip(&request.ip)?;
        validate_file_id(&request.file_id)?;

        let ledger = Arc::clone(&self.ledger);
        let attempt = AccessAttempt::now(&request.user_id, &request.file_id, &request.ip);
        let entry = blocking(move || Ok(ledger.record(attempt)?)).await?;
        trace.logged(entry.sequence);

        let result = self.run_gates(&request, &mut trace).await;

        let outcome = match &result {
            Ok(_) => AccessOutcome::granted(),
            Err(CustodyError::Denied(reason)) => AccessOutcome::denied(*reason),
            Err(other) => AccessOutcome::failed(other.kind()),
        };
        self.resolve_outcome(entry.sequence, outcome).await;

        match result {
            Ok((record, staged)) => {
                trace.advance(AccessState::Granted);
                info!(
                    sequence = entry.sequence,
                    user_id = %request.user_id,
                    file_id = %record.file_id,
                    "Download granted"
                );
                let body = spawn_plaintext_stream(staged, self.file_key.clone(), entry.sequence);
                Ok(DownloadGrant {
                    sequence: entry.sequence,
                    record,
                    body,
                })
            }
            Err(e) => {
                if let CustodyError::Denied(reason) = &e {
                    trace.advance(AccessState::Denied(*reason));
                    info!(
                        sequence = entry.sequence,
                        user_id = %request.user_id,
                        file_id = %request.file_id,
                        reason = reason.as_str(),
                        "Download denied"
                    );
                } else {
                    warn!(sequence = entry.sequence, error = %e, "Download failed");
                }
                trace.advance(AccessState::CleanedUp);
                Err(e)
            }
        }
    }

    async fn run_gates(
        &self,
        request: &DownloadRequest,
        trace: &mut AccessTrace,
    ) -> CustodyResult<(FileRecord, StagedFile)> {
        // Second factor, against the stored credential only
        if !self.check_second_factor(&request.user_id, &request.otp_code).await? {
            return Err(CustodyError::Denied(DenialReason::InvalidSecondFactor));
        }
        trace.advance(AccessState::SecondFactorChecked);

        let record = self.load_record(&request.file_id).await?;

        // Integrity: anchored, and the stored blob still matches
        let staged = self.staging.allocate("download.enc");
        let problem = if !self.anchor.is_anchored(&record.fingerprint).await? {
            Some("fingerprint not anchored")
        } else {
            match self.fetch_and_fingerprint(&record, staged.path()).await? {
                Some(actual) if actual == record.fingerprint => None,
                Some(_) => Some("fingerprint mismatch"),
                None => Some("blob missing"),
            }
        };
        if let Some(problem) = problem {
            self.raise_alert(
                AlertEvent::new(AlertKind::IntegrityCompromised)
                    .with_user(&request.user_id)
                    .with_file(&record.file_id)
                    .with_ip(&request.ip)
                    .with_details(problem),
            )
            .await;
            return Err(CustodyError::Denied(DenialReason::IntegrityCompromised));
        }
        trace.advance(AccessState::IntegrityChecked);

        // Anomaly: the history includes this attempt
        let ledger = Arc::clone(&self.ledger);
        let user_id = request.user_id.clone();
        let lookback = self.anomaly.rules().thresholds().lookback();
        let history = blocking(move || Ok(ledger.recent_entries(&user_id, lookback)?)).await?;

        let verdict = self.anomaly.assess(&request.user_id, &request.ip, &history).await?;
        if let Some(flag) = verdict.flag(&request.user_id, &request.ip, &record.file_id) {
            self.raise_alert(
                AlertEvent::new(AlertKind::SuspiciousActivity)
                    .with_severity(flag.severity)
                    .with_user(flag.user_id)
                    .with_file(flag.file_id)
                    .with_ip(flag.ip)
                    .with_details(flag.reason.as_str()),
            )
            .await;
            return Err(CustodyError::Denied(DenialReason::SuspiciousActivity));
        }
        trace.advance(AccessState::AnomalyChecked);

        Ok((record, staged))
    }

    async fn check_second_factor(&self, user_id: &str, code: &str) -> CustodyResult<bool> {
        let gate: Arc<SecondFactorGate> = Arc::clone(&self.second_factor);
        let user_id = user_id.to_string();
        let code = code.to_string();
        blocking(move || Ok(gate.verify_principal(&user_id, &code)?)).await
    }

    /// Write back the outcome; a failure here is logged, the decision stands.
    async fn resolve_outcome(&self, sequence: u64, outcome: AccessOutcome) {
        let ledger = Arc::clone(&self.ledger);
        match blocking(move || Ok(ledger.resolve(sequence, &outcome)?)).await {
            Ok(true) => {}
            Ok(false) => warn!(sequence, "Access outcome was already resolved"),
            Err(e) => warn!(sequence, error = %e, "Failed to record access outcome"),
        }
    }
}

enum PumpError {
    /// The receiver went away (client disconnected)
    Disconnected,
    Failed(CustodyError),
}

impl From<io::Error> for PumpError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PumpError::Failed(crypto::CryptoError::TruncatedFrame.into())
        } else {
            PumpError::Failed(CustodyError::Storage(e.to_string()))
        }
    }
}

impl From<crypto::CryptoError> for PumpError {
    fn from(e: crypto::CryptoError) -> Self {
        PumpError::Failed(e.into())
    }
}

/// Decrypt the staged container on a task, one frame at a time.
///
/// The task owns the staging guard, so the ciphertext is removed when the
/// stream ends, fails, or the client goes away.
fn spawn_plaintext_stream(staged: StagedFile, key: EncryptionKey, sequence: u64) -> PlaintextStream {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER_FRAMES);

    tokio::spawn(async move {
        match pump_plaintext(staged.path(), &key, &tx).await {
            Ok(bytes) => debug!(sequence, bytes, "Download stream complete"),
            Err(PumpError::Disconnected) => debug!(sequence, "Client disconnected mid-stream"),
            Err(PumpError::Failed(e)) => {
                warn!(sequence, error = %e, "Download stream aborted");
                let _ = tx.send(Err(io::Error::other("decryption failed"))).await;
            }
        }
        drop(staged);
        debug!(sequence, state = ?AccessState::CleanedUp, "Access state transition");
    });

    ReceiverStream::new(rx)
}

async fn pump_plaintext(
    path: &Path,
    key: &EncryptionKey,
    tx: &mpsc::Sender<io::Result<Vec<u8>>>,
) -> Result<u64, PumpError> {
    let mut reader = BufReader::new(tokio::fs::File::open(path).await?);

    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| PumpError::from(crypto::CryptoError::MissingHeader))?;
    let mut decryptor = StreamDecryptor::new(key, &header)?;

    let mut sent = 0u64;
    while !decryptor.is_finished() {
        let raw = match reader.read_u32().await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(crypto::CryptoError::MissingFinalFrame.into())
            }
            Err(e) => return Err(e.into()),
        };
        let (len, last) = crypto::parse_frame_header(raw)?;
        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;

        let plaintext = decryptor.open_frame(frame, last)?;
        if plaintext.is_empty() {
            continue;
        }
        sent += plaintext.len() as u64;
        tx.send(Ok(plaintext))
            .await
            .map_err(|_| PumpError::Disconnected)?;
    }

    let mut probe = [0u8; 1];
    if reader.read(&mut probe).await? != 0 {
        return Err(crypto::CryptoError::TrailingData.into());
    }
    Ok(sent)
}
