// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Anomaly Sweeper
//!
//! Background task that periodically re-evaluates recent activity across
//! all principals and raises `suspicious_activity` alerts. It catches
//! patterns spread over requests that each passed the gate on their own.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::rules::{window_start, AnomalyRules};
use crate::storage::{AccessLedger, AccessLogEntry, AlertEvent, AlertKind, AlertLog};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct AnomalySweeper {
    ledger: Arc<AccessLedger>,
    alerts: Arc<AlertLog>,
    rules: AnomalyRules,
    interval: Duration,
    /// Highest sequence already alerted on, per principal
    alerted_through: HashMap<String, u64>,
}

impl AnomalySweeper {
    pub fn new(ledger: Arc<AccessLedger>, alerts: Arc<AlertLog>, rules: AnomalyRules) -> Self {
        Self {
            ledger,
            alerts,
            rules,
            interval: DEFAULT_SWEEP_INTERVAL,
            alerted_through: HashMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Anomaly sweeper starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.sweep_step().await {
                Ok(0) => {}
                Ok(raised) => info!(raised, "Anomaly sweep raised alerts"),
                Err(e) => warn!(error = %e, "Anomaly sweep failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Anomaly sweeper shutting down");
    }

    /// One pass over the lookback window. Returns the number of alerts raised.
    pub async fn sweep_step(&mut self) -> Result<usize, crate::storage::AccessLedgerError> {
        let since = window_start(Utc::now(), self.rules.thresholds().lookback());

        let ledger = Arc::clone(&self.ledger);
        let entries = tokio::task::spawn_blocking(move || ledger.entries_since(since))
            .await
            .map_err(|e| crate::storage::AccessLedgerError::InvalidEntry(e.to_string()))??;

        let mut by_user: BTreeMap<&str, Vec<&AccessLogEntry>> = BTreeMap::new();
        for entry in &entries {
            by_user.entry(entry.user_id.as_str()).or_default().push(entry);
        }
        debug!(users = by_user.len(), entries = entries.len(), "Anomaly sweep");

        // Principals that left the window need no high-water mark
        self.alerted_through
            .retain(|user_id, _| by_user.contains_key(user_id.as_str()));

        let mut pending = Vec::new();
        for (user_id, user_entries) in by_user {
            let Some(latest) = user_entries.last() else {
                continue;
            };
            let already = self.alerted_through.get(user_id).copied().unwrap_or(0);
            if latest.sequence <= already {
                continue;
            }

            let history: Vec<AccessLogEntry> = user_entries.iter().map(|e| (*e).clone()).collect();
            let verdict = self.rules.evaluate(user_id, &latest.ip, &history);
            let Some(flag) = verdict.flag(user_id, &latest.ip, &latest.file_id) else {
                continue;
            };

            pending.push(
                AlertEvent::new(AlertKind::SuspiciousActivity)
                    .with_severity(flag.severity)
                    .with_user(flag.user_id)
                    .with_file(flag.file_id)
                    .with_ip(flag.ip)
                    .with_details(format!("sweep: {}", flag.reason.as_str())),
            );
            self.alerted_through.insert(user_id.to_string(), latest.sequence);
        }

        let raised = pending.len();
        if raised > 0 {
            let alerts = Arc::clone(&self.alerts);
            let written = tokio::task::spawn_blocking(move || {
                for alert in pending {
                    alerts.raise(alert);
                }
            })
            .await;
            if let Err(e) = written {
                warn!(error = %e, "Anomaly sweep alert writer failed");
            }
        }
        Ok(raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AccessAttempt, StoragePaths};
    use tempfile::TempDir;

    fn setup() -> (TempDir, AnomalySweeper, Arc<AccessLedger>, Arc<AlertLog>) {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(AccessLedger::open(&temp.path().join("access.redb")).unwrap());
        let alerts = Arc::new(AlertLog::new(StoragePaths::new(temp.path())));
        let sweeper = AnomalySweeper::new(Arc::clone(&ledger), Arc::clone(&alerts), AnomalyRules::default());
        (temp, sweeper, ledger, alerts)
    }

    fn today_alerts(alerts: &AlertLog) -> Vec<AlertEvent> {
        alerts
            .read_events(&Utc::now().format("%Y-%m-%d").to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn quiet_ledger_raises_nothing() {
        let (_temp, mut sweeper, ledger, alerts) = setup();
        ledger.record(AccessAttempt::now("alice", "f", "10.0.0.1")).unwrap();

        assert_eq!(sweeper.sweep_step().await.unwrap(), 0);
        assert!(today_alerts(&alerts).is_empty());
    }

    #[tokio::test]
    async fn ip_spread_raises_one_alert_per_new_activity() {
        let (_temp, mut sweeper, ledger, alerts) = setup();
        for i in 1..=6 {
            ledger
                .record(AccessAttempt::now("alice", "f", format!("10.0.0.{i}")))
                .unwrap();
        }

        assert_eq!(sweeper.sweep_step().await.unwrap(), 1);
        // Nothing new since the last alert
        assert_eq!(sweeper.sweep_step().await.unwrap(), 0);

        let events = today_alerts(&alerts);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::SuspiciousActivity);
        assert_eq!(events[0].user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn principals_outside_the_window_are_forgotten() {
        let (_temp, mut sweeper, ledger, _alerts) = setup();
        sweeper.alerted_through.insert("departed".to_string(), 42);
        for i in 1..=6 {
            ledger
                .record(AccessAttempt::now("alice", "f", format!("10.0.0.{i}")))
                .unwrap();
        }

        assert_eq!(sweeper.sweep_step().await.unwrap(), 1);
        assert!(!sweeper.alerted_through.contains_key("departed"));
        assert!(sweeper.alerted_through.contains_key("alice"));
    }

    #[tokio::test]
    async fn oversized_windows_do_not_overflow() {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(AccessLedger::open(&temp.path().join("access.redb")).unwrap());
        let alerts = Arc::new(AlertLog::new(StoragePaths::new(temp.path())));
        let huge = Duration::from_secs(10_000_000_000_000);
        let rules = AnomalyRules::new(crate::anomaly::AnomalyThresholds {
            ip_window: huge,
            failure_window: huge,
            ..Default::default()
        });
        let mut sweeper = AnomalySweeper::new(Arc::clone(&ledger), alerts, rules);
        ledger.record(AccessAttempt::now("alice", "f", "10.0.0.1")).unwrap();

        assert_eq!(sweeper.sweep_step().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (_temp, sweeper, _ledger, _alerts) = setup();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper.with_interval(Duration::from_secs(3600)).run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
