// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Anomaly Gate
//!
//! Decides whether an access attempt looks suspicious, from the principal's
//! recent ledger history.
//!
//! - [`AnomalyRules`]: deterministic thresholds, always evaluated
//! - [`AnomalyClassifier`]: optional external scorer, awaited with a timeout
//! - [`AnomalySweeper`]: periodic background pass that raises alerts; the
//!   gating path never depends on it

pub mod classifier;
pub mod rules;
pub mod sweeper;

use std::sync::Arc;

pub use classifier::{AnomalyClassifier, ClassifierError, CommandClassifier, FlaggedEntry};
pub use rules::{AnomalyFlag, AnomalyReason, AnomalyRules, AnomalyThresholds, Verdict};
pub use sweeper::AnomalySweeper;

use crate::storage::AccessLogEntry;

/// What to do when the classifier cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifierFailurePolicy {
    /// Refuse the attempt
    #[default]
    FailClosed,
    /// Fall back to the rules alone
    FailOpen,
}

/// Rules plus the optional classifier, as used on the download path.
#[derive(Clone)]
pub struct AnomalyGate {
    rules: AnomalyRules,
    classifier: Option<Arc<dyn AnomalyClassifier>>,
    failure_policy: ClassifierFailurePolicy,
}

impl AnomalyGate {
    pub fn new(rules: AnomalyRules) -> Self {
        Self {
            rules,
            classifier: None,
            failure_policy: ClassifierFailurePolicy::default(),
        }
    }

    pub fn with_classifier(
        mut self,
        classifier: Arc<dyn AnomalyClassifier>,
        failure_policy: ClassifierFailurePolicy,
    ) -> Self {
        self.classifier = Some(classifier);
        self.failure_policy = failure_policy;
        self
    }

    pub fn rules(&self) -> &AnomalyRules {
        &self.rules
    }

    /// Assess an attempt. `entries` is the principal's recent history,
    /// including the attempt itself.
    ///
    /// Errors only when the classifier fails under the fail-closed policy.
    pub async fn assess(
        &self,
        user_id: &str,
        ip: &str,
        entries: &[AccessLogEntry],
    ) -> Result<Verdict, ClassifierError> {
        let verdict = self.rules.evaluate(user_id, ip, entries);
        if verdict.suspicious {
            return Ok(verdict);
        }

        let Some(classifier) = &self.classifier else {
            return Ok(verdict);
        };

        match classifier.classify(entries).await {
            Ok(flagged) if flagged.iter().any(|f| f.matches(user_id, ip)) => {
                Ok(Verdict::flagged(AnomalyReason::ClassifierFlagged))
            }
            Ok(_) => Ok(verdict),
            Err(e) => match self.failure_policy {
                ClassifierFailurePolicy::FailClosed => Err(e),
                ClassifierFailurePolicy::FailOpen => {
                    tracing::warn!(
                        classifier = classifier.name(),
                        error = %e,
                        "Anomaly classifier unavailable; using rules only"
                    );
                    Ok(verdict)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::classifier::ClassifierFuture;
    use crate::storage::AccessOutcome;
    use chrono::Utc;

    struct Fixed(Result<Vec<FlaggedEntry>, ()>);

    impl AnomalyClassifier for Fixed {
        fn classify<'a>(&'a self, _entries: &'a [AccessLogEntry]) -> ClassifierFuture<'a> {
            let result = match &self.0 {
                Ok(flagged) => Ok(flagged.clone()),
                Err(()) => Err(ClassifierError::Timeout(std::time::Duration::from_secs(1))),
            };
            Box::pin(async move { result })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn history() -> Vec<AccessLogEntry> {
        vec![AccessLogEntry {
            sequence: 1,
            user_id: "alice".to_string(),
            file_id: "f".to_string(),
            ip: "10.0.0.1".to_string(),
            timestamp: Utc::now(),
            outcome: AccessOutcome::attempted(),
        }]
    }

    fn flag(user: &str, ip: &str) -> FlaggedEntry {
        FlaggedEntry {
            user_id: Some(user.to_string()),
            ip: Some(ip.to_string()),
        }
    }

    #[tokio::test]
    async fn rules_only_gate_passes_normal_activity() {
        let gate = AnomalyGate::new(AnomalyRules::default());
        assert!(!gate.assess("alice", "10.0.0.1", &history()).await.unwrap().suspicious);
    }

    #[tokio::test]
    async fn classifier_flag_for_same_pair_is_suspicious() {
        let gate = AnomalyGate::new(AnomalyRules::default()).with_classifier(
            Arc::new(Fixed(Ok(vec![flag("alice", "10.0.0.1")]))),
            ClassifierFailurePolicy::FailClosed,
        );
        let verdict = gate.assess("alice", "10.0.0.1", &history()).await.unwrap();
        assert_eq!(verdict.reason, Some(AnomalyReason::ClassifierFlagged));
    }

    #[tokio::test]
    async fn classifier_flag_for_other_pair_is_ignored() {
        let gate = AnomalyGate::new(AnomalyRules::default()).with_classifier(
            Arc::new(Fixed(Ok(vec![flag("alice", "10.9.9.9"), flag("bob", "10.0.0.1")]))),
            ClassifierFailurePolicy::FailClosed,
        );
        assert!(!gate.assess("alice", "10.0.0.1", &history()).await.unwrap().suspicious);
    }

    #[tokio::test]
    async fn failure_policy_decides_on_classifier_error() {
        let closed = AnomalyGate::new(AnomalyRules::default())
            .with_classifier(Arc::new(Fixed(Err(()))), ClassifierFailurePolicy::FailClosed);
        assert!(closed.assess("alice", "10.0.0.1", &history()).await.is_err());

        let open = AnomalyGate::new(AnomalyRules::default())
            .with_classifier(Arc::new(Fixed(Err(()))), ClassifierFailurePolicy::FailOpen);
        assert!(!open.assess("alice", "10.0.0.1", &history()).await.unwrap().suspicious);
    }
}
