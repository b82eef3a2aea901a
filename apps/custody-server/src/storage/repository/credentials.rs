// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Second-factor credential repository.
//!
//! ## Storage Layout
//!
//! ```text
//! /data/credentials/{sha256(principal_id)}.json
//! ```
//!
//! The shared secret is sealed with the credential sub-key before it touches
//! disk; only `active_secret` ever sees it in the clear. A principal has at
//! most one active credential. Issuing again replaces it.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::{LocalStorage, StorageError, StorageResult};
use crate::crypto::{self, EncryptionKey};

/// Credential document as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub principal_id: String,
    /// Base64 of the encrypted secret container
    pub sealed_secret: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl StoredCredential {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Repository for sealed second-factor secrets.
pub struct CredentialRepository<'a> {
    storage: &'a LocalStorage,
    key: &'a EncryptionKey,
}

impl<'a> CredentialRepository<'a> {
    pub fn new(storage: &'a LocalStorage, key: &'a EncryptionKey) -> Self {
        Self { storage, key }
    }

    fn path(&self, principal_id: &str) -> std::path::PathBuf {
        // Principal IDs are client input; hash them into a safe file name
        self.storage
            .paths()
            .credential(&crypto::fingerprint(principal_id.as_bytes()))
    }

    fn load(&self, principal_id: &str) -> StorageResult<Option<StoredCredential>> {
        let path = self.path(principal_id);
        if !self.storage.exists(&path) {
            return Ok(None);
        }
        let stored: StoredCredential = self.storage.read_json(path)?;
        if stored.principal_id != principal_id {
            return Err(StorageError::IntegrityViolation(
                "Credential principal mismatch".to_string(),
            ));
        }
        Ok(Some(stored))
    }

    /// Seal and store `secret` as the principal's active credential,
    /// replacing any previous one.
    pub fn store(&self, principal_id: &str, secret: &str) -> StorageResult<StoredCredential> {
        let sealed = crypto::encrypt(secret.as_bytes(), self.key)
            .map_err(|e| StorageError::Sealing(e.to_string()))?;

        let credential = StoredCredential {
            principal_id: principal_id.to_string(),
            sealed_secret: Base64::encode_string(&sealed),
            issued_at: Utc::now(),
            revoked_at: None,
        };
        self.storage.write_json(self.path(principal_id), &credential)?;
        Ok(credential)
    }

    /// The principal's active secret, or `None` if none was issued or it was revoked.
    pub fn active_secret(&self, principal_id: &str) -> StorageResult<Option<String>> {
        let Some(stored) = self.load(principal_id)? else {
            return Ok(None);
        };
        if !stored.is_active() {
            return Ok(None);
        }

        let sealed = Base64::decode_vec(&stored.sealed_secret)
            .map_err(|_| StorageError::Sealing("Malformed sealed secret".to_string()))?;
        let secret = crypto::decrypt(&sealed, self.key)
            .map_err(|e| StorageError::Sealing(e.to_string()))?;
        String::from_utf8(secret)
            .map(Some)
            .map_err(|_| StorageError::Sealing("Secret is not UTF-8".to_string()))
    }

    /// Revoke the principal's credential.
    ///
    /// Returns `NotFound` if no active credential exists.
    pub fn revoke(&self, principal_id: &str) -> StorageResult<()> {
        let mut stored = self
            .load(principal_id)?
            .filter(StoredCredential::is_active)
            .ok_or_else(|| StorageError::NotFound(format!("Credential for {principal_id}")))?;

        stored.revoked_at = Some(Utc::now());
        self.storage.write_json(self.path(principal_id), &stored)
    }
}
