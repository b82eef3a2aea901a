// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chunked AES-256-GCM encryption with a random nonce prefix per payload.

use std::io::{self, Read, Write};

use hmac::{Hmac, Mac};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

/// AES-256 key size in bytes.
pub const KEY_LEN: usize = 32;

/// Plaintext bytes sealed per frame.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// GCM authentication tag size.
pub const TAG_LEN: usize = 16;

const MAGIC: &[u8; 4] = b"CSV1";
const NONCE_PREFIX_LEN: usize = 7;

/// Magic plus nonce prefix.
pub const HEADER_LEN: usize = MAGIC.len() + NONCE_PREFIX_LEN;

const LAST_FRAME_FLAG: u32 = 0x8000_0000;
const MAX_FRAME_LEN: usize = CHUNK_SIZE + TAG_LEN;

type HmacSha256 = Hmac<Sha256>;

/// Errors raised by the crypto engine.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("key is not valid hex")]
    InvalidKeyEncoding,

    #[error("ciphertext header is missing or truncated")]
    MissingHeader,

    #[error("unsupported ciphertext format")]
    UnsupportedFormat,

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("plaintext chunk exceeds {CHUNK_SIZE} bytes")]
    ChunkTooLarge,

    #[error("ciphertext frame is truncated")]
    TruncatedFrame,

    #[error("ciphertext ends without a final frame")]
    MissingFinalFrame,

    #[error("unexpected data after the final frame")]
    TrailingData,

    #[error("stream already finished")]
    StreamFinished,

    #[error("frame counter overflow")]
    CounterOverflow,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("system randomness unavailable")]
    Randomness,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

impl EncryptionKey {
    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// Parse a 64-character hex key (an optional `0x` prefix is accepted).
    pub fn from_hex(value: &str) -> CryptoResult<Self> {
        let bytes = alloy::hex::decode(value.trim()).map_err(|_| CryptoError::InvalidKeyEncoding)?;
        Self::from_slice(&bytes)
    }

    /// Generate a random key.
    pub fn generate() -> CryptoResult<Self> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| CryptoError::Randomness)?;
        Ok(Self { bytes })
    }

    /// Derive a purpose-bound sub-key (HMAC-SHA256 of the label).
    pub fn derive(&self, label: &str) -> CryptoResult<Self> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.bytes).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: self.bytes.len(),
            }
        })?;
        mac.update(label.as_bytes());
        Self::from_slice(&mac.finalize().into_bytes())
    }

    fn aead_key(&self) -> CryptoResult<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.bytes).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: self.bytes.len(),
            }
        })?;
        Ok(LessSafeKey::new(unbound))
    }
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32, last: bool) -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..NONCE_PREFIX_LEN + 4].copy_from_slice(&counter.to_be_bytes());
    nonce[NONCE_LEN - 1] = u8::from(last);
    Nonce::assume_unique_for_key(nonce)
}

/// Split a raw frame header into `(ciphertext_len, is_last)`.
pub fn parse_frame_header(raw: u32) -> CryptoResult<(usize, bool)> {
    let last = raw & LAST_FRAME_FLAG != 0;
    let len = (raw & !LAST_FRAME_FLAG) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CryptoError::FrameTooLarge(len));
    }
    if len < TAG_LEN {
        return Err(CryptoError::TruncatedFrame);
    }
    Ok((len, last))
}

/// Seals plaintext chunks into frames.
pub struct StreamEncryptor {
    key: LessSafeKey,
    prefix: [u8; NONCE_PREFIX_LEN],
    counter: u32,
    finished: bool,
}

impl StreamEncryptor {
    /// Start a new stream with a fresh random nonce prefix.
    pub fn new(key: &EncryptionKey) -> CryptoResult<Self> {
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        SystemRandom::new()
            .fill(&mut prefix)
            .map_err(|_| CryptoError::Randomness)?;
        Ok(Self {
            key: key.aead_key()?,
            prefix,
            counter: 0,
            finished: false,
        })
    }

    /// The container header; must precede the first frame.
    pub fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..MAGIC.len()].copy_from_slice(MAGIC);
        header[MAGIC.len()..].copy_from_slice(&self.prefix);
        header
    }

    /// Seal one chunk and return the framed bytes (length word included).
    pub fn seal_frame(&mut self, plaintext: &[u8], last: bool) -> CryptoResult<Vec<u8>> {
        if self.finished {
            return Err(CryptoError::StreamFinished);
        }
        if plaintext.len() > CHUNK_SIZE {
            return Err(CryptoError::ChunkTooLarge);
        }

        let nonce = frame_nonce(&self.prefix, self.counter, last);
        let mut in_out = Vec::with_capacity(plaintext.len() + TAG_LEN);
        in_out.extend_from_slice(plaintext);
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterOverflow)?;
        self.finished = last;

        let mut raw = in_out.len() as u32;
        if last {
            raw |= LAST_FRAME_FLAG;
        }
        let mut frame = Vec::with_capacity(4 + in_out.len());
        frame.extend_from_slice(&raw.to_be_bytes());
        frame.extend_from_slice(&in_out);
        Ok(frame)
    }
}

/// Opens frames produced by [`StreamEncryptor`], in order.
pub struct StreamDecryptor {
    key: LessSafeKey,
    prefix: [u8; NONCE_PREFIX_LEN],
    counter: u32,
    finished: bool,
}

impl StreamDecryptor {
    pub fn new(key: &EncryptionKey, header: &[u8]) -> CryptoResult<Self> {
        if header.len() < HEADER_LEN {
            return Err(CryptoError::MissingHeader);
        }
        if &header[..MAGIC.len()] != MAGIC {
            return Err(CryptoError::UnsupportedFormat);
        }
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(&header[MAGIC.len()..HEADER_LEN]);
        Ok(Self {
            key: key.aead_key()?,
            prefix,
            counter: 0,
            finished: false,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Authenticate and decrypt one frame body.
    pub fn open_frame(&mut self, mut ciphertext: Vec<u8>, last: bool) -> CryptoResult<Vec<u8>> {
        if self.finished {
            return Err(CryptoError::TrailingData);
        }
        let nonce = frame_nonce(&self.prefix, self.counter, last);
        let plaintext_len = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)?
            .len();
        ciphertext.truncate(plaintext_len);

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterOverflow)?;
        self.finished = last;
        Ok(ciphertext)
    }
}

/// Fill `buf` from `reader` until full or EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_chunk<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let n = read_full(reader, &mut chunk)?;
    chunk.truncate(n);
    Ok(chunk)
}

/// Encrypt everything from `reader` into `writer`. Returns ciphertext bytes written.
pub fn encrypt_to<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &EncryptionKey,
) -> CryptoResult<u64> {
    let mut encryptor = StreamEncryptor::new(key)?;
    writer.write_all(&encryptor.header())?;
    let mut written = HEADER_LEN as u64;

    let mut current = read_chunk(&mut reader)?;
    loop {
        // A short chunk can only be the last one; a full chunk needs a look-ahead.
        let next = if current.len() == CHUNK_SIZE {
            read_chunk(&mut reader)?
        } else {
            Vec::new()
        };
        let last = next.is_empty();
        let frame = encryptor.seal_frame(&current, last)?;
        writer.write_all(&frame)?;
        written += frame.len() as u64;
        if last {
            break;
        }
        current = next;
    }

    writer.flush()?;
    Ok(written)
}

/// Decrypt a full container from `reader` into `writer`. Returns plaintext bytes written.
pub fn decrypt_to<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &EncryptionKey,
) -> CryptoResult<u64> {
    let mut header = [0u8; HEADER_LEN];
    if read_full(&mut reader, &mut header)? < HEADER_LEN {
        return Err(CryptoError::MissingHeader);
    }
    let mut decryptor = StreamDecryptor::new(key, &header)?;
    let mut written = 0u64;

    while !decryptor.is_finished() {
        let mut word = [0u8; 4];
        match read_full(&mut reader, &mut word)? {
            0 => return Err(CryptoError::MissingFinalFrame),
            4 => {}
            _ => return Err(CryptoError::TruncatedFrame),
        }
        let (len, last) = parse_frame_header(u32::from_be_bytes(word))?;
        let mut body = vec![0u8; len];
        if read_full(&mut reader, &mut body)? < len {
            return Err(CryptoError::TruncatedFrame);
        }
        let plaintext = decryptor.open_frame(body, last)?;
        writer.write_all(&plaintext)?;
        written += plaintext.len() as u64;
    }

    let mut probe = [0u8; 1];
    if read_full(&mut reader, &mut probe)? != 0 {
        return Err(CryptoError::TrailingData);
    }

    writer.flush()?;
    Ok(written)
}

/// Encrypt an in-memory payload.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> CryptoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + TAG_LEN + 4);
    encrypt_to(plaintext, &mut out, key)?;
    Ok(out)
}

/// Decrypt an in-memory payload.
pub fn decrypt(ciphertext: &[u8], key: &EncryptionKey) -> CryptoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(ciphertext.len());
    decrypt_to(ciphertext, &mut out, key)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_slice(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn roundtrip_preserves_bytes() {
        let key = key();
        for payload in [
            Vec::new(),
            b"hello custody".to_vec(),
            vec![0xAB; CHUNK_SIZE],
            vec![0x42; CHUNK_SIZE * 2 + 17],
        ] {
            let sealed = encrypt(&payload, &key).unwrap();
            assert_eq!(decrypt(&sealed, &key).unwrap(), payload);
        }
    }

    #[test]
    fn empty_input_is_single_final_frame() {
        let sealed = encrypt(b"", &key()).unwrap();
        assert_eq!(sealed.len(), HEADER_LEN + 4 + TAG_LEN);
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let key = key();
        let a = encrypt(b"identical", &key).unwrap();
        let b = encrypt(b"identical", &key).unwrap();
        assert_ne!(a, b, "nonce prefix must be fresh per encryption");
        assert_ne!(a[..HEADER_LEN], b[..HEADER_LEN]);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = encrypt(b"secret", &key()).unwrap();
        let other = EncryptionKey::from_slice(&[8u8; KEY_LEN]).unwrap();
        assert!(matches!(
            decrypt(&sealed, &other),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let mut sealed = encrypt(b"do not touch", &key()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            decrypt(&sealed, &key()),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(matches!(
            decrypt(b"CSV", &key()),
            Err(CryptoError::MissingHeader)
        ));
        assert!(matches!(
            decrypt(b"", &key()),
            Err(CryptoError::MissingHeader)
        ));
    }

    #[test]
    fn foreign_format_is_rejected() {
        let mut sealed = encrypt(b"data", &key()).unwrap();
        sealed[0] = b'X';
        assert!(matches!(
            decrypt(&sealed, &key()),
            Err(CryptoError::UnsupportedFormat)
        ));
    }

    #[test]
    fn truncation_is_detected() {
        let payload = vec![1u8; CHUNK_SIZE + 10];
        let sealed = encrypt(&payload, &key()).unwrap();

        // Drop the final frame entirely.
        let first_frame_end = HEADER_LEN + 4 + CHUNK_SIZE + TAG_LEN;
        assert!(matches!(
            decrypt(&sealed[..first_frame_end], &key()),
            Err(CryptoError::MissingFinalFrame)
        ));

        // Cut inside the final frame.
        assert!(matches!(
            decrypt(&sealed[..sealed.len() - 3], &key()),
            Err(CryptoError::TruncatedFrame)
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut sealed = encrypt(b"abc", &key()).unwrap();
        sealed.push(0);
        assert!(matches!(
            decrypt(&sealed, &key()),
            Err(CryptoError::TrailingData)
        ));
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(matches!(
            EncryptionKey::from_slice(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
        assert!(EncryptionKey::from_hex("zz").is_err());
        assert!(EncryptionKey::from_hex(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn derived_keys_are_distinct_and_stable() {
        let master = key();
        let files = master.derive("custody/files/v1").unwrap();
        let creds = master.derive("custody/credentials/v1").unwrap();
        assert_ne!(files, creds);
        assert_eq!(files, master.derive("custody/files/v1").unwrap());
    }

    #[test]
    fn encryptor_refuses_frames_after_last() {
        let mut enc = StreamEncryptor::new(&key()).unwrap();
        enc.seal_frame(b"x", true).unwrap();
        assert!(matches!(
            enc.seal_frame(b"y", false),
            Err(CryptoError::StreamFinished)
        ));
    }
}
