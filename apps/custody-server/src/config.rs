// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! once at startup into [`AppConfig`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for custody data | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `CUSTODY_MASTER_KEY` | 64 hex chars; file and credential keys derive from it | Required |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key; both set enables HTTPS | Unset (HTTP) |
//! | `MAX_UPLOAD_BYTES` | Request body limit for `/upload` | `1073741824` |
//! | `TOTP_ISSUER` | Issuer label in provisioning URIs | `Custody` |
//! | `ANOMALY_MAX_DISTINCT_IPS` | Distinct IPs tolerated per window | `5` |
//! | `ANOMALY_IP_WINDOW_SECS` | Window for the IP rule, at most 30 days | `60` |
//! | `ANOMALY_MAX_FAILED_2FA` | Failed second factors tolerated per window | `5` |
//! | `ANOMALY_FAILURE_WINDOW_SECS` | Window for the failure rule, at most 30 days | `300` |
//! | `ANOMALY_CLASSIFIER_CMD` | External classifier command line | Unset |
//! | `ANOMALY_CLASSIFIER_TIMEOUT_MS` | Classifier timeout | `2000` |
//! | `ANOMALY_CLASSIFIER_FAIL_OPEN` | Fall back to rules when the classifier fails | `false` |
//! | `ANOMALY_SWEEP_INTERVAL_SECS` | Background sweep interval, `0` disables | `60` |
//! | `ANCHOR_RPC_URL` | EVM JSON-RPC endpoint | Unset (local registry) |
//! | `ANCHOR_CONTRACT_ADDRESS` | File registry contract | Required with RPC URL |
//! | `ANCHOR_SIGNER_KEY` | Hex private key for anchoring transactions | Required with RPC URL |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::anomaly::{AnomalyThresholds, ClassifierFailurePolicy};
use crate::crypto::EncryptionKey;

/// Environment variable name for the data directory path.
///
/// Holds file records, sealed credentials, the blob bucket, staging files,
/// both redb ledgers and the alert log.
///
/// # Default
/// `/data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "/data";

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Logging format: `json` for production, anything else is pretty-printed.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Environment variable name for the master key.
///
/// The master key never encrypts anything directly. Purpose-bound sub-keys
/// for file payloads and second-factor credentials are derived from it.
pub const MASTER_KEY_ENV: &str = "CUSTODY_MASTER_KEY";

pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

pub const MAX_UPLOAD_BYTES_ENV: &str = "MAX_UPLOAD_BYTES";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub const TOTP_ISSUER_ENV: &str = "TOTP_ISSUER";
pub const DEFAULT_TOTP_ISSUER: &str = "Custody";

pub const ANOMALY_MAX_DISTINCT_IPS_ENV: &str = "ANOMALY_MAX_DISTINCT_IPS";
pub const ANOMALY_IP_WINDOW_SECS_ENV: &str = "ANOMALY_IP_WINDOW_SECS";
pub const ANOMALY_MAX_FAILED_2FA_ENV: &str = "ANOMALY_MAX_FAILED_2FA";
pub const ANOMALY_FAILURE_WINDOW_SECS_ENV: &str = "ANOMALY_FAILURE_WINDOW_SECS";

/// Longest accepted anomaly rule window (30 days).
pub const MAX_ANOMALY_WINDOW_SECS: u64 = 30 * 24 * 3600;
pub const ANOMALY_CLASSIFIER_CMD_ENV: &str = "ANOMALY_CLASSIFIER_CMD";
pub const ANOMALY_CLASSIFIER_TIMEOUT_MS_ENV: &str = "ANOMALY_CLASSIFIER_TIMEOUT_MS";
pub const ANOMALY_CLASSIFIER_FAIL_OPEN_ENV: &str = "ANOMALY_CLASSIFIER_FAIL_OPEN";
pub const ANOMALY_SWEEP_INTERVAL_SECS_ENV: &str = "ANOMALY_SWEEP_INTERVAL_SECS";

pub const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// EVM anchoring. When `ANCHOR_RPC_URL` is unset fingerprints are anchored
/// in the local registry under `DATA_DIR/ledger/anchors.redb`.
pub const ANCHOR_RPC_URL_ENV: &str = "ANCHOR_RPC_URL";
pub const ANCHOR_CONTRACT_ADDRESS_ENV: &str = "ANCHOR_CONTRACT_ADDRESS";
pub const ANCHOR_SIGNER_KEY_ENV: &str = "ANCHOR_SIGNER_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// PEM files for HTTPS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// EVM anchoring settings.
#[derive(Clone)]
pub struct EvmAnchorConfig {
    pub rpc_url: String,
    pub contract_address: String,
    pub signer_key: String,
}

impl std::fmt::Debug for EvmAnchorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmAnchorConfig")
            .field("rpc_url", &self.rpc_url)
            .field("contract_address", &self.contract_address)
            .field("signer_key", &"<redacted>")
            .finish()
    }
}

/// Anomaly gate settings.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub thresholds: AnomalyThresholds,
    pub classifier_command: Option<String>,
    pub classifier_timeout: Duration,
    pub failure_policy: ClassifierFailurePolicy,
    /// `None` disables the background sweeper
    pub sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub json_logs: bool,
    pub master_key: EncryptionKey,
    pub tls: Option<TlsConfig>,
    pub max_upload_bytes: usize,
    pub totp_issuer: String,
    pub anomaly: AnomalyConfig,
    pub evm_anchor: Option<EvmAnchorConfig>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()));

        let host = get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(get(PORT_ENV), PORT_ENV, DEFAULT_PORT)?;
        let bind_addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: HOST_ENV,
                reason: e.to_string(),
            })?;

        let json_logs = get(LOG_FORMAT_ENV).is_some_and(|v| v.eq_ignore_ascii_case("json"));

        let master_key = get(MASTER_KEY_ENV).ok_or(ConfigError::Missing(MASTER_KEY_ENV))?;
        let master_key = EncryptionKey::from_hex(&master_key).map_err(|e| ConfigError::Invalid {
            name: MASTER_KEY_ENV,
            reason: e.to_string(),
        })?;

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_PATH_ENV)),
        };

        let max_upload_bytes = parse_or(get(MAX_UPLOAD_BYTES_ENV), MAX_UPLOAD_BYTES_ENV, DEFAULT_MAX_UPLOAD_BYTES)?;
        let totp_issuer = get(TOTP_ISSUER_ENV).unwrap_or_else(|| DEFAULT_TOTP_ISSUER.to_string());
        if totp_issuer.contains(':') {
            return Err(ConfigError::Invalid {
                name: TOTP_ISSUER_ENV,
                reason: "must not contain ':'".to_string(),
            });
        }

        let defaults = AnomalyThresholds::default();
        let thresholds = AnomalyThresholds {
            max_distinct_ips: parse_or(
                get(ANOMALY_MAX_DISTINCT_IPS_ENV),
                ANOMALY_MAX_DISTINCT_IPS_ENV,
                defaults.max_distinct_ips,
            )?,
            ip_window: parse_window(
                get(ANOMALY_IP_WINDOW_SECS_ENV),
                ANOMALY_IP_WINDOW_SECS_ENV,
                defaults.ip_window,
            )?,
            max_failed_second_factor: parse_or(
                get(ANOMALY_MAX_FAILED_2FA_ENV),
                ANOMALY_MAX_FAILED_2FA_ENV,
                defaults.max_failed_second_factor,
            )?,
            failure_window: parse_window(
                get(ANOMALY_FAILURE_WINDOW_SECS_ENV),
                ANOMALY_FAILURE_WINDOW_SECS_ENV,
                defaults.failure_window,
            )?,
        };

        let fail_open = match get(ANOMALY_CLASSIFIER_FAIL_OPEN_ENV).as_deref() {
            None => false,
            Some(v) => parse_bool(v).ok_or_else(|| ConfigError::Invalid {
                name: ANOMALY_CLASSIFIER_FAIL_OPEN_ENV,
                reason: format!("expected true or false, got {v:?}"),
            })?,
        };
        let sweep_secs = parse_or(
            get(ANOMALY_SWEEP_INTERVAL_SECS_ENV),
            ANOMALY_SWEEP_INTERVAL_SECS_ENV,
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?;
        let anomaly = AnomalyConfig {
            thresholds,
            classifier_command: get(ANOMALY_CLASSIFIER_CMD_ENV),
            classifier_timeout: Duration::from_millis(parse_or(
                get(ANOMALY_CLASSIFIER_TIMEOUT_MS_ENV),
                ANOMALY_CLASSIFIER_TIMEOUT_MS_ENV,
                DEFAULT_CLASSIFIER_TIMEOUT_MS,
            )?),
            failure_policy: if fail_open {
                ClassifierFailurePolicy::FailOpen
            } else {
                ClassifierFailurePolicy::FailClosed
            },
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        };

        let evm_anchor = match get(ANCHOR_RPC_URL_ENV) {
            None => None,
            Some(rpc_url) => Some(EvmAnchorConfig {
                rpc_url,
                contract_address: get(ANCHOR_CONTRACT_ADDRESS_ENV)
                    .ok_or(ConfigError::Missing(ANCHOR_CONTRACT_ADDRESS_ENV))?,
                signer_key: get(ANCHOR_SIGNER_KEY_ENV).ok_or(ConfigError::Missing(ANCHOR_SIGNER_KEY_ENV))?,
            }),
        };

        Ok(Self {
            data_dir,
            bind_addr,
            json_logs,
            master_key,
            tls,
            max_upload_bytes,
            totp_issuer,
            anomaly,
            evm_anchor,
        })
    }

    /// Defaults rooted at `data_dir` with a fresh master key.
    #[cfg(test)]
    pub(crate) fn for_data_dir(data_dir: &std::path::Path) -> Self {
        let key = alloy::hex::encode([7u8; 32]);
        let dir = data_dir.to_string_lossy().into_owned();
        let mut config = Self::from_lookup(|name| match name {
            DATA_DIR_ENV => Some(dir.clone()),
            MASTER_KEY_ENV => Some(key.clone()),
            _ => None,
        })
        .unwrap();
        config.anomaly.sweep_interval = None;
        config
    }
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

/// An anomaly window in seconds, within `1..=MAX_ANOMALY_WINDOW_SECS`.
fn parse_window(value: Option<String>, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let secs = parse_or(value, name, default.as_secs())?;
    if !(1..=MAX_ANOMALY_WINDOW_SECS).contains(&secs) {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be between 1 and {MAX_ANOMALY_WINDOW_SECS} seconds"),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
