// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Threshold rules over a principal's recent access history.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::{AccessLogEntry, DenialReason, Severity};

/// Rule thresholds. A rule fires when a count is strictly greater than its
/// maximum within its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyThresholds {
    pub max_distinct_ips: usize,
    pub ip_window: Duration,
    pub max_failed_second_factor: usize,
    pub failure_window: Duration,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            max_distinct_ips: 5,
            ip_window: Duration::from_secs(60),
            max_failed_second_factor: 5,
            failure_window: Duration::from_secs(300),
        }
    }
}

impl AnomalyThresholds {
    /// Longest window any rule looks at.
    pub fn lookback(&self) -> Duration {
        self.ip_window.max(self.failure_window)
    }
}

/// Which rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    TooManyDistinctIps,
    RepeatedSecondFactorFailures,
    ClassifierFlagged,
}

impl AnomalyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyReason::TooManyDistinctIps => "too_many_distinct_ips",
            AnomalyReason::RepeatedSecondFactorFailures => "repeated_2fa_failures",
            AnomalyReason::ClassifierFlagged => "classifier_flagged",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AnomalyReason::TooManyDistinctIps => Severity::High,
            AnomalyReason::RepeatedSecondFactorFailures => Severity::Medium,
            AnomalyReason::ClassifierFlagged => Severity::Medium,
        }
    }
}

/// Result of evaluating one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub suspicious: bool,
    pub reason: Option<AnomalyReason>,
}

impl Verdict {
    pub fn clear() -> Self {
        Self {
            suspicious: false,
            reason: None,
        }
    }

    pub fn flagged(reason: AnomalyReason) -> Self {
        Self {
            suspicious: true,
            reason: Some(reason),
        }
    }

    /// The flag for a suspicious verdict.
    pub fn flag(&self, user_id: &str, ip: &str, file_id: &str) -> Option<AnomalyFlag> {
        let reason = self.reason.filter(|_| self.suspicious)?;
        Some(AnomalyFlag {
            user_id: user_id.to_string(),
            ip: ip.to_string(),
            file_id: file_id.to_string(),
            severity: reason.severity(),
            reason,
        })
    }
}

/// A suspicious (principal, address) pair, derived per evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnomalyFlag {
    pub user_id: String,
    pub ip: String,
    pub file_id: String,
    pub severity: Severity,
    pub reason: AnomalyReason,
}

/// Pure rule evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyRules {
    thresholds: AnomalyThresholds,
}

impl AnomalyRules {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AnomalyThresholds {
        &self.thresholds
    }

    /// Evaluate an attempt by `user_id` from `ip` against `entries`.
    ///
    /// Windows are measured back from the newest entry, so the result depends
    /// only on the entries given. Entries for other principals are ignored.
    pub fn evaluate(&self, user_id: &str, ip: &str, entries: &[AccessLogEntry]) -> Verdict {
        let reference = entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.timestamp)
            .max()
            .unwrap_or_else(Utc::now);

        let ip_since = window_start(reference, self.thresholds.ip_window);
        let mut ips: HashSet<&str> = entries
            .iter()
            .filter(|e| e.user_id == user_id && e.timestamp >= ip_since)
            .map(|e| e.ip.as_str())
            .collect();
        ips.insert(ip);
        if ips.len() > self.thresholds.max_distinct_ips {
            return Verdict::flagged(AnomalyReason::TooManyDistinctIps);
        }

        let failure_since = window_start(reference, self.thresholds.failure_window);
        let failures = entries
            .iter()
            .filter(|e| {
                e.user_id == user_id
                    && e.timestamp >= failure_since
                    && e.outcome.is_denial(DenialReason::InvalidSecondFactor)
            })
            .count();
        if failures > self.thresholds.max_failed_second_factor {
            return Verdict::flagged(AnomalyReason::RepeatedSecondFactorFailures);
        }

        Verdict::clear()
    }
}

/// Start of a window ending at `reference`. Saturates at the earliest
/// representable instant instead of overflowing.
pub(crate) fn window_start(reference: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|span| reference.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
