// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Integrity Anchor Client
//!
//! Registers file fingerprints in an append-only registry and answers
//! membership queries. A fingerprint that is not anchored makes its file
//! un-downloadable.
//!
//! Two backends:
//! - [`EvmAnchorClient`]: a registry contract on an EVM chain
//! - [`LocalAnchorRegistry`]: a redb table on the data volume

pub mod evm;
pub mod registry;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use evm::EvmAnchorClient;
pub use registry::LocalAnchorRegistry;

/// Proof that a fingerprint was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub fingerprint: String,
    /// Transaction reference, when the backend produced one
    pub transaction_id: Option<String>,
    pub backend: String,
    pub anchored_at: DateTime<Utc>,
    /// The fingerprint was registered before this call
    pub already_anchored: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("invalid fingerprint")]
    InvalidFingerprint,

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("contract error: {0}")]
    Contract(String),

    #[error("invalid anchor configuration: {0}")]
    InvalidConfig(String),

    #[error("registry error: {0}")]
    Registry(String),
}

pub type AnchorResult<T> = Result<T, AnchorError>;

/// Boxed future returned by [`IntegrityAnchor`] methods.
pub type AnchorFuture<'a, T> = Pin<Box<dyn Future<Output = AnchorResult<T>> + Send + 'a>>;

/// Append-only fingerprint registry.
pub trait IntegrityAnchor: Send + Sync {
    /// Register a fingerprint.
    fn anchor<'a>(&'a self, fingerprint: &'a str) -> AnchorFuture<'a, AnchorReceipt>;

    /// Whether a fingerprint has been registered.
    fn is_anchored<'a>(&'a self, fingerprint: &'a str) -> AnchorFuture<'a, bool>;

    /// Backend name for logs and health reporting.
    fn backend(&self) -> &'static str;
}

/// Anchor `fingerprint`, treating an existing registration as success.
///
/// Checks membership first, and re-checks after a failed anchor call so a
/// concurrent or earlier registration of the same fingerprint is not an
/// error.
pub async fn ensure_anchored(
    anchor: &dyn IntegrityAnchor,
    fingerprint: &str,
) -> AnchorResult<AnchorReceipt> {
    if !crate::crypto::is_fingerprint(fingerprint) {
        return Err(AnchorError::InvalidFingerprint);
    }

    if anchor.is_anchored(fingerprint).await? {
        tracing::debug!(fingerprint, backend = anchor.backend(), "Fingerprint already anchored");
        return Ok(existing_receipt(anchor, fingerprint));
    }

    match anchor.anchor(fingerprint).await {
        Ok(receipt) => {
            tracing::info!(
                fingerprint,
                backend = anchor.backend(),
                transaction_id = receipt.transaction_id.as_deref().unwrap_or("-"),
                "Fingerprint anchored"
            );
            Ok(receipt)
        }
        Err(e) => {
            if anchor.is_anchored(fingerprint).await.unwrap_or(false) {
                tracing::info!(fingerprint, error = %e, "Anchor call failed but fingerprint is registered");
                Ok(existing_receipt(anchor, fingerprint))
            } else {
                Err(e)
            }
        }
    }
}

fn existing_receipt(anchor: &dyn IntegrityAnchor, fingerprint: &str) -> AnchorReceipt {
    AnchorReceipt {
        fingerprint: fingerprint.to_string(),
        transaction_id: None,
        backend: anchor.backend().to_string(),
        anchored_at: Utc::now(),
        already_anchored: true,
    }
}
