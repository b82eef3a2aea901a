// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SHA-256 content fingerprints (64 lowercase hex characters).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Length of a hex fingerprint.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Incremental fingerprint over a byte stream.
#[derive(Default, Clone)]
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> String {
        alloy::hex::encode(self.hasher.finalize())
    }
}

/// Fingerprint an in-memory payload.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut fp = Fingerprinter::new();
    fp.update(bytes);
    fp.finalize()
}

/// Fingerprint a file without loading it into memory.
pub fn fingerprint_file(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut fp = Fingerprinter::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        fp.update(&buf[..n]);
    }
    Ok(fp.finalize())
}

/// Whether `value` has the shape of a fingerprint.
pub fn is_fingerprint(value: &str) -> bool {
    value.len() == FINGERPRINT_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_digest() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut fp = Fingerprinter::new();
        fp.update(b"hello ");
        fp.update(b"world");
        assert_eq!(fp.finalize(), fingerprint(b"hello world"));
    }

    #[test]
    fn file_fingerprint_matches_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let payload = vec![9u8; 200_000];
        file.write_all(&payload).unwrap();
        file.flush().unwrap();

        assert_eq!(fingerprint_file(file.path()).unwrap(), fingerprint(&payload));
    }

    #[test]
    fn shape_check() {
        assert!(is_fingerprint(&fingerprint(b"x")));
        assert!(!is_fingerprint("abc"));
        assert!(!is_fingerprint(&"G".repeat(64)));
        assert!(!is_fingerprint(&"A".repeat(64)));
    }
}
