// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RFC 4648 base32 (unpadded), the encoding authenticator apps expect for
//! shared secrets.

use base32ct::{Base32Unpadded, Encoding};

/// Encode bytes as unpadded uppercase base32.
pub fn encode(bytes: &[u8]) -> String {
    Base32Unpadded::encode_string(bytes).to_ascii_uppercase()
}

/// Decode base32, case-insensitive, ignoring trailing padding.
///
/// Returns `None` for characters outside the alphabet.
pub fn decode(input: &str) -> Option<Vec<u8>> {
    let normalized = input.trim_end_matches('=').to_ascii_lowercase();
    Base32Unpadded::decode_vec(&normalized).ok()
}
