// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RFC 6238 time-based one-time passwords.
//!
//! HMAC-SHA1, 6 digits, 30 second steps. Verification accepts the current
//! step and one step either side to absorb clock drift.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::{Choice, ConstantTimeEq};
use url::Url;

use super::base32;
use super::{SecondFactorError, SecondFactorResult};

/// Code length.
pub const DIGITS: usize = 6;

/// Step length in seconds.
pub const PERIOD_SECS: u64 = 30;

/// Steps accepted either side of the current one.
pub const SKEW_STEPS: u64 = 1;

/// Random secret length in bytes (160 bits).
pub const SECRET_LEN: usize = 20;

/// A freshly issued credential, returned to the caller exactly once.
#[derive(Debug, Clone)]
pub struct IssuedSecret {
    /// Base32 shared secret
    pub secret: String,
    /// `otpauth://` URI for authenticator enrolment
    pub provisioning_uri: String,
}

/// Generate a new random secret for `principal`.
pub fn issue(principal: &str, issuer: &str) -> SecondFactorResult<IssuedSecret> {
    let mut raw = [0u8; SECRET_LEN];
    SystemRandom::new()
        .fill(&mut raw)
        .map_err(|_| SecondFactorError::Randomness)?;

    let secret = base32::encode(&raw);
    let provisioning_uri = provisioning_uri(principal, issuer, &secret)?;
    Ok(IssuedSecret {
        secret,
        provisioning_uri,
    })
}

/// Build the `otpauth://totp/` enrolment URI.
pub fn provisioning_uri(principal: &str, issuer: &str, secret: &str) -> SecondFactorResult<String> {
    let mut uri = Url::parse("otpauth://totp/").map_err(|e| SecondFactorError::Uri(e.to_string()))?;
    uri.set_path(&format!("/{issuer}:{principal}"));
    uri.query_pairs_mut()
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &PERIOD_SECS.to_string());
    Ok(uri.to_string())
}

/// The code for `secret` at `unix_secs`, or `None` if the secret is not base32.
pub fn code_at(secret: &str, unix_secs: u64) -> Option<String> {
    let key = base32::decode(secret)?;
    if key.is_empty() {
        return None;
    }
    Some(hotp(&key, unix_secs / PERIOD_SECS))
}

/// The code for `secret` right now.
pub fn current_code(secret: &str) -> Option<String> {
    code_at(secret, now_secs())
}

/// Check `code` against `secret` at the current time.
pub fn verify(code: &str, secret: &str) -> bool {
    verify_at(code, secret, now_secs())
}

/// Check `code` against `secret` at `unix_secs`. Malformed input is a mismatch.
pub fn verify_at(code: &str, secret: &str, unix_secs: u64) -> bool {
    if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Some(key) = base32::decode(secret).filter(|k| !k.is_empty()) else {
        return false;
    };

    let step = unix_secs / PERIOD_SECS;
    let mut matched = Choice::from(0u8);
    for candidate in step.saturating_sub(SKEW_STEPS)..=step.saturating_add(SKEW_STEPS) {
        // No early exit: every window is checked
        matched |= hotp(&key, candidate).as_bytes().ct_eq(code.as_bytes());
    }
    matched.into()
}

fn hotp(key: &[u8], counter: u64) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    let tag = hmac::sign(&key, &counter.to_be_bytes());
    let digest = tag.as_ref();

    // RFC 4226 dynamic truncation
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    format!("{:0width$}", binary % 10u32.pow(DIGITS as u32), width = DIGITS)
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B SHA1 seed, base32 encoded
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_vectors() {
        assert_eq!(code_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(code_at(RFC_SECRET, 1_111_111_109).unwrap(), "081804");
        assert_eq!(code_at(RFC_SECRET, 1_234_567_890).unwrap(), "005924");
    }

    #[test]
    fn verify_accepts_adjacent_steps() {
        let t = 1_234_567_890;
        let code = code_at(RFC_SECRET, t).unwrap();
        assert!(verify_at(&code, RFC_SECRET, t));
        assert!(verify_at(&code, RFC_SECRET, t + PERIOD_SECS));
        assert!(verify_at(&code, RFC_SECRET, t - PERIOD_SECS));
        assert!(!verify_at(&code, RFC_SECRET, t + 3 * PERIOD_SECS));
    }

    #[test]
    fn malformed_codes_are_rejected() {
        let t = 59;
        for code in ["", "28708", "2870822", "28708a", " 287082"] {
            assert!(!verify_at(code, RFC_SECRET, t), "{code:?} should not verify");
        }
        assert!(!verify_at("287082", "not base32!", t));
        assert!(!verify_at("287082", "", t));
    }

    #[test]
    fn issue_produces_fresh_secrets() {
        let a = issue("alice", "Custody").unwrap();
        let b = issue("alice", "Custody").unwrap();
        assert_ne!(a.secret, b.secret);
        assert_eq!(a.secret.len(), 32);

        let code = current_code(&a.secret).unwrap();
        assert!(verify(&code, &a.secret));
    }

    #[test]
    fn provisioning_uri_carries_parameters() {
        let issued = issue("alice@example.com", "Custody").unwrap();
        let uri = Url::parse(&issued.provisioning_uri).unwrap();

        assert_eq!(uri.scheme(), "otpauth");
        assert_eq!(uri.host_str(), Some("totp"));
        let pairs: std::collections::HashMap<_, _> = uri.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("secret"), Some(&issued.secret));
        assert_eq!(pairs.get("issuer").map(String::as_str), Some("Custody"));
        assert_eq!(pairs.get("digits").map(String::as_str), Some("6"));
    }
}
