// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Crypto Engine
//!
//! Symmetric encryption of file payloads and content fingerprinting.
//!
//! ## Container Format
//!
//! ```text
//! "CSV1" | nonce prefix (7 random bytes) | frame*
//! frame = u32 BE (ciphertext length | LAST flag) | AES-256-GCM(ciphertext || tag)
//! ```
//!
//! Every encryption draws a fresh nonce prefix; the per-frame nonce is
//! `prefix || counter (u32 BE) || last flag`, so frames cannot be reordered,
//! dropped or truncated without failing authentication.
//!
//! Fingerprints are SHA-256 over the *ciphertext* that is actually stored,
//! so integrity checks detect tampering at the storage layer.

pub mod engine;
pub mod fingerprint;

pub use engine::{
    decrypt, decrypt_to, encrypt, encrypt_to, parse_frame_header, CryptoError, CryptoResult,
    EncryptionKey, StreamDecryptor, StreamEncryptor, CHUNK_SIZE, HEADER_LEN,
};
pub use fingerprint::{fingerprint, fingerprint_file, is_fingerprint, Fingerprinter};
