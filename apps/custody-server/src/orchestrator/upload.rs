// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Streaming upload.
//!
//! The payload is sealed frame by frame into a staging file as it arrives,
//! and the fingerprint is computed over the ciphertext on the way. The
//! plaintext is never written to disk.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, info};

use super::{blocking, validate_user_id, AccessOrchestrator, CustodyError, CustodyResult};
use crate::anchor::ensure_anchored;
use crate::crypto::{Fingerprinter, StreamEncryptor, CHUNK_SIZE};
use crate::storage::{
    AlertEvent, AlertKind, FileRecord, FileRepository, StagedFile, StoragePaths,
};

const MAX_FILENAME_LEN: usize = 255;

/// An upload in progress. Dropping it discards the staged ciphertext.
pub struct UploadSession {
    filename: String,
    uploaded_by: Option<String>,
    staged: StagedFile,
    writer: BufWriter<tokio::fs::File>,
    encryptor: StreamEncryptor,
    fingerprinter: Fingerprinter,
    pending: Vec<u8>,
    ciphertext_len: u64,
}

impl UploadSession {
    /// Append plaintext.
    pub async fn write(&mut self, data: &[u8]) -> CustodyResult<()> {
        self.pending.extend_from_slice(data);
        // Hold back at least one byte so the final frame is always known
        while self.pending.len() > CHUNK_SIZE {
            let rest = self.pending.split_off(CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.pending, rest);
            self.emit(&chunk, false).await?;
        }
        Ok(())
    }

    /// Record the uploader when it arrives after the file.
    pub fn set_uploaded_by(&mut self, user_id: &str) -> CustodyResult<()> {
        validate_user_id(user_id)?;
        self.uploaded_by = Some(user_id.to_string());
        Ok(())
    }

    async fn emit(&mut self, chunk: &[u8], last: bool) -> CustodyResult<()> {
        let frame = self.encryptor.seal_frame(chunk, last)?;
        self.fingerprinter.update(&frame);
        self.writer.write_all(&frame).await.map_err(staging_err)?;
        self.ciphertext_len += frame.len() as u64;
        Ok(())
    }

    /// Seal the final frame and flush. Returns (fingerprint, ciphertext length).
    async fn seal(&mut self) -> CustodyResult<(String, u64)> {
        let last = std::mem::take(&mut self.pending);
        self.emit(&last, true).await?;
        self.writer.flush().await.map_err(staging_err)?;
        self.writer.get_ref().sync_all().await.map_err(staging_err)?;
        let fingerprint = std::mem::take(&mut self.fingerprinter).finalize();
        Ok((fingerprint, self.ciphertext_len))
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub file_id: String,
    pub fingerprint: String,
    pub size_bytes: u64,
    pub anchor_tx: Option<String>,
}

fn staging_err(e: std::io::Error) -> CustodyError {
    CustodyError::Storage(format!("staging write failed: {e}"))
}

/// Reduce a client file name to a bare, printable name.
fn clean_filename(filename: &str) -> CustodyResult<String> {
    let base = Path::new(filename.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if base.is_empty() || base.chars().any(char::is_control) {
        return Err(CustodyError::Validation("file must have a valid filename".to_string()));
    }
    if base.len() > MAX_FILENAME_LEN {
        return Err(CustodyError::Validation("filename is too long".to_string()));
    }
    Ok(base.to_string())
}

impl AccessOrchestrator {
    /// Open an upload session for `filename`.
    pub async fn begin_upload(
        &self,
        filename: &str,
        uploaded_by: Option<&str>,
    ) -> CustodyResult<UploadSession> {
        let filename = clean_filename(filename)?;
        if let Some(user_id) = uploaded_by {
            validate_user_id(user_id)?;
        }

        let encryptor = StreamEncryptor::new(&self.file_key)?;
        let staged = self.staging.allocate("upload.enc");
        let file = tokio::fs::File::create(staged.path())
            .await
            .map_err(staging_err)?;
        let mut writer = BufWriter::new(file);

        let header = encryptor.header();
        writer.write_all(&header).await.map_err(staging_err)?;
        let mut fingerprinter = Fingerprinter::new();
        fingerprinter.update(&header);

        Ok(UploadSession {
            filename,
            uploaded_by: uploaded_by.map(str::to_string),
            staged,
            writer,
            encryptor,
            fingerprinter,
            pending: Vec::with_capacity(CHUNK_SIZE),
            ciphertext_len: header.len() as u64,
        })
    }

    /// Seal, anchor, store and record the upload.
    pub async fn finish_upload(&self, mut session: UploadSession) -> CustodyResult<UploadReceipt> {
        let (fingerprint, size_bytes) = session.seal().await?;

        let anchor_receipt = ensure_anchored(self.anchor.as_ref(), &fingerprint).await?;

        let file_id = uuid::Uuid::new_v4().to_string();
        let storage_key = StoragePaths::blob_key(&file_id);

        let blobs = Arc::clone(&self.blobs);
        let key = storage_key.clone();
        let source = session.staged.path().to_path_buf();
        if let Err(e) = blocking(move || Ok(blobs.put(&key, &source)?)).await {
            error!(file_id = %file_id, error = %e, "Blob write failed after anchoring");
            self.raise_alert(
                AlertEvent::new(AlertKind::AnchorOrphaned)
                    .with_file(&file_id)
                    .with_details(format!("fingerprint {fingerprint} anchored, blob write failed")),
            )
            .await;
            return Err(e);
        }
        drop(session.staged);

        let record = FileRecord {
            file_id: file_id.clone(),
            filename: session.filename,
            storage_key: storage_key.clone(),
            fingerprint: fingerprint.clone(),
            size_bytes,
            anchor_tx: anchor_receipt.transaction_id.clone(),
            uploaded_by: session.uploaded_by,
            created_at: Utc::now(),
        };

        let storage = Arc::clone(&self.storage);
        let to_persist = record.clone();
        if let Err(e) = blocking(move || Ok(FileRepository::new(&storage).create(&to_persist)?)).await {
            error!(file_id = %file_id, error = %e, "Metadata write failed; rolling back blob");
            let blobs = Arc::clone(&self.blobs);
            let key = storage_key.clone();
            if let Err(cleanup) = blocking(move || Ok(blobs.delete(&key)?)).await {
                error!(file_id = %file_id, error = %cleanup, "Blob rollback failed");
            }
            self.raise_alert(
                AlertEvent::new(AlertKind::UploadRolledBack)
                    .with_file(&file_id)
                    .with_details("metadata write failed"),
            )
            .await;
            self.raise_alert(
                AlertEvent::new(AlertKind::AnchorOrphaned)
                    .with_file(&file_id)
                    .with_details(format!("fingerprint {fingerprint} anchored, upload rolled back")),
            )
            .await;
            return Err(e);
        }

        info!(
            file_id = %record.file_id,
            size_bytes,
            anchor_backend = self.anchor.backend(),
            already_anchored = anchor_receipt.already_anchored,
            "File uploaded"
        );

        Ok(UploadReceipt {
            file_id: record.file_id,
            fingerprint: record.fingerprint,
            size_bytes,
            anchor_tx: record.anchor_tx,
        })
    }

    /// Upload an in-memory payload in one call.
    pub async fn upload_bytes(
        &self,
        filename: &str,
        uploaded_by: Option<&str>,
        payload: &[u8],
    ) -> CustodyResult<UploadReceipt> {
        let mut session = self.begin_upload(filename, uploaded_by).await?;
        session.write(payload).await?;
        self.finish_upload(session).await
    }
}
