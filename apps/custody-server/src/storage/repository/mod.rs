// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to local document storage.

pub mod credentials;
pub mod files;

pub use credentials::{CredentialRepository, StoredCredential};
pub use files::{FileRecord, FileRepository};
