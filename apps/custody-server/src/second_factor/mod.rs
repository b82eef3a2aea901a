// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Second-Factor Gate
//!
//! TOTP enrolment and verification for download requests.
//!
//! Secrets are generated server-side, returned once to the caller for
//! enrolment, and kept only in sealed form (see
//! [`CredentialRepository`]). Downloads are checked against the stored
//! secret for the requesting principal, never against a client-supplied one.
//!
//! While a credential is active, rotating or revoking it requires a valid
//! code for that credential. A principal with no credential, or a revoked
//! one, can be issued a secret without proof.

pub mod base32;
pub mod totp;

pub use totp::{issue, verify, verify_at, IssuedSecret};

use crate::crypto::EncryptionKey;
use crate::storage::{CredentialRepository, LocalStorage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum SecondFactorError {
    #[error("random number generator failure")]
    Randomness,

    #[error("invalid provisioning uri: {0}")]
    Uri(String),

    #[error("a valid code for the active credential is required")]
    ProofRequired,

    #[error("credential storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type SecondFactorResult<T> = Result<T, SecondFactorError>;

/// Issues, verifies and revokes per-principal TOTP credentials.
///
/// All methods touch the filesystem; async callers use the blocking pool.
pub struct SecondFactorGate {
    storage: LocalStorage,
    sealing_key: EncryptionKey,
    issuer: String,
}

impl SecondFactorGate {
    pub fn new(storage: LocalStorage, sealing_key: EncryptionKey, issuer: impl Into<String>) -> Self {
        Self {
            storage,
            sealing_key,
            issuer: issuer.into(),
        }
    }

    fn credentials(&self) -> CredentialRepository<'_> {
        CredentialRepository::new(&self.storage, &self.sealing_key)
    }

    /// Issue a fresh secret for `principal_id`.
    ///
    /// If the principal already has an active credential, `current_code`
    /// must verify against it and the new secret replaces it.
    pub fn issue(
        &self,
        principal_id: &str,
        current_code: Option<&str>,
    ) -> SecondFactorResult<IssuedSecret> {
        let credentials = self.credentials();
        let rotating = match credentials.active_secret(principal_id)? {
            Some(active) => {
                let proven = current_code.is_some_and(|code| totp::verify(code, &active));
                if !proven {
                    tracing::warn!(principal_id, "Second factor re-issue refused without proof");
                    return Err(SecondFactorError::ProofRequired);
                }
                true
            }
            None => false,
        };

        let issued = totp::issue(principal_id, &self.issuer)?;
        credentials.store(principal_id, &issued.secret)?;
        tracing::info!(principal_id, rotating, "Second factor issued");
        Ok(issued)
    }

    /// Whether `code` is valid for the principal's active credential.
    ///
    /// A principal without an active credential never verifies.
    pub fn verify_principal(&self, principal_id: &str, code: &str) -> SecondFactorResult<bool> {
        match self.credentials().active_secret(principal_id)? {
            Some(secret) => Ok(totp::verify(code, &secret)),
            None => {
                tracing::debug!(principal_id, "No active second factor");
                Ok(false)
            }
        }
    }

    /// Disable the principal's credential until a new one is issued.
    ///
    /// `code` must verify against the active credential. A principal with no
    /// active credential is `NotFound`.
    pub fn revoke(&self, principal_id: &str, code: &str) -> SecondFactorResult<()> {
        let credentials = self.credentials();
        let Some(active) = credentials.active_secret(principal_id)? else {
            return Err(StorageError::NotFound(format!("Credential for {principal_id}")).into());
        };
        if !totp::verify(code, &active) {
            tracing::warn!(principal_id, "Second factor revocation refused without proof");
            return Err(SecondFactorError::ProofRequired);
        }
        credentials.revoke(principal_id)?;
        tracing::info!(principal_id, "Second factor revoked");
        Ok(())
    }
}
