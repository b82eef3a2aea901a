// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local anchor registry backed by redb.
//!
//! Used when no chain endpoint is configured. Entries are insert-only:
//! there is no API to remove or overwrite a registered fingerprint.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{AnchorError, AnchorFuture, AnchorReceipt, AnchorResult, IntegrityAnchor};

/// fingerprint → serialized AnchorReceipt
const ANCHORS: TableDefinition<&str, &[u8]> = TableDefinition::new("anchors");

const BACKEND: &str = "local";

#[derive(Clone)]
pub struct LocalAnchorRegistry {
    db: Arc<Database>,
}

fn registry_err(e: impl std::fmt::Display) -> AnchorError {
    AnchorError::Registry(e.to_string())
}

impl LocalAnchorRegistry {
    /// Open (or create) the registry database.
    pub fn open(path: &Path) -> AnchorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(registry_err)?;
        }
        let db = Database::create(path).map_err(registry_err)?;

        let write_txn = db.begin_write().map_err(registry_err)?;
        {
            let _ = write_txn.open_table(ANCHORS).map_err(registry_err)?;
        }
        write_txn.commit().map_err(registry_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn anchor_blocking(db: &Database, fingerprint: &str) -> AnchorResult<AnchorReceipt> {
        let write_txn = db.begin_write().map_err(registry_err)?;
        let receipt = {
            let mut table = write_txn.open_table(ANCHORS).map_err(registry_err)?;
            let existing: Option<AnchorReceipt> = match table.get(fingerprint).map_err(registry_err)? {
                Some(raw) => Some(serde_json::from_slice(raw.value()).map_err(registry_err)?),
                None => None,
            };
            if let Some(mut receipt) = existing {
                receipt.already_anchored = true;
                receipt
            } else {
                let receipt = AnchorReceipt {
                    fingerprint: fingerprint.to_string(),
                    transaction_id: Some(format!("local:{}", uuid::Uuid::new_v4())),
                    backend: BACKEND.to_string(),
                    anchored_at: Utc::now(),
                    already_anchored: false,
                };
                let json = serde_json::to_vec(&receipt).map_err(registry_err)?;
                table.insert(fingerprint, json.as_slice()).map_err(registry_err)?;
                receipt
            }
        };
        write_txn.commit().map_err(registry_err)?;
        Ok(receipt)
    }

    fn is_anchored_blocking(db: &Database, fingerprint: &str) -> AnchorResult<bool> {
        let read_txn = db.begin_read().map_err(registry_err)?;
        let table = read_txn.open_table(ANCHORS).map_err(registry_err)?;
        Ok(table.get(fingerprint).map_err(registry_err)?.is_some())
    }
}

impl IntegrityAnchor for LocalAnchorRegistry {
    fn anchor<'a>(&'a self, fingerprint: &'a str) -> AnchorFuture<'a, AnchorReceipt> {
        Box::pin(async move {
            let db = Arc::clone(&self.db);
            let fingerprint = fingerprint.to_string();
            tokio::task::spawn_blocking(move || Self::anchor_blocking(&db, &fingerprint))
                .await
                .map_err(registry_err)?
        })
    }

    fn is_anchored<'a>(&'a self, fingerprint: &'a str) -> AnchorFuture<'a, bool> {
        Box::pin(async move {
            let db = Arc::clone(&self.db);
            let fingerprint = fingerprint.to_string();
            tokio::task::spawn_blocking(move || Self::is_anchored_blocking(&db, &fingerprint))
                .await
                .map_err(registry_err)?
        })
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::ensure_anchored;
    use tempfile::TempDir;

    fn registry() -> (TempDir, LocalAnchorRegistry) {
        let temp = TempDir::new().unwrap();
        let registry = LocalAnchorRegistry::open(&temp.path().join("anchors.redb")).unwrap();
        (temp, registry)
    }

    #[tokio::test]
    async fn anchor_then_query() {
        let (_temp, registry) = registry();
        let fp = crate::crypto::fingerprint(b"a");

        assert!(!registry.is_anchored(&fp).await.unwrap());
        let receipt = registry.anchor(&fp).await.unwrap();
        assert!(!receipt.already_anchored);
        assert!(receipt.transaction_id.is_some());
        assert!(registry.is_anchored(&fp).await.unwrap());
    }

    #[tokio::test]
    async fn anchoring_twice_is_idempotent() {
        let (_temp, registry) = registry();
        let fp = crate::crypto::fingerprint(b"a");

        let first = registry.anchor(&fp).await.unwrap();
        let second = registry.anchor(&fp).await.unwrap();
        assert!(second.already_anchored);
        assert_eq!(first.transaction_id, second.transaction_id);

        let third = ensure_anchored(&registry, &fp).await.unwrap();
        assert!(third.already_anchored);
        assert!(registry.is_anchored(&fp).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_anchoring_registers_once() {
        let (_temp, registry) = registry();
        let fp = crate::crypto::fingerprint(b"shared");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let fp = fp.clone();
                tokio::spawn(async move { registry.anchor(&fp).await.unwrap() })
            })
            .collect();

        let mut fresh = 0;
        for task in tasks {
            if !task.await.unwrap().already_anchored {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn registry_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("anchors.redb");
        let fp = crate::crypto::fingerprint(b"persisted");
        {
            let registry = LocalAnchorRegistry::open(&path).unwrap();
            registry.anchor(&fp).await.unwrap();
        }
        let registry = LocalAnchorRegistry::open(&path).unwrap();
        assert!(registry.is_anchored(&fp).await.unwrap());
    }
}
