// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custody Server - Secure File Custody Service
//!
//! Accepts file uploads, encrypts them at rest, anchors a fingerprint of
//! every stored ciphertext and gates downloads behind a second factor, an
//! integrity re-check and an anomaly check. Every access attempt lands in
//! an append-only ledger before any gate runs.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `anchor` - Integrity anchor clients (EVM contract, local registry)
//! - `anomaly` - Anomaly rules, external classifier, background sweeper
//! - `crypto` - Streaming AES-256-GCM container and fingerprints
//! - `orchestrator` - Upload and download state machines
//! - `second_factor` - TOTP issuance and verification
//! - `storage` - Access ledger, file records, blobs, staging, alerts

pub mod anchor;
pub mod anomaly;
pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod second_factor;
pub mod state;
pub mod storage;
