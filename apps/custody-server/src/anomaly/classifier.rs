// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External anomaly classifier.
//!
//! The classifier receives the recent access entries as a JSON array and
//! returns the subset it considers anomalous, also as a JSON array. Only the
//! `userId` and `ip` of returned entries are used.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::storage::AccessLogEntry;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("failed to start classifier: {0}")]
    Spawn(std::io::Error),

    #[error("classifier i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("invalid classifier output: {0}")]
    InvalidOutput(#[from] serde_json::Error),
}

/// An entry the classifier considers anomalous.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlaggedEntry {
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub ip: Option<String>,
}

impl FlaggedEntry {
    pub fn matches(&self, user_id: &str, ip: &str) -> bool {
        self.user_id.as_deref() == Some(user_id) && self.ip.as_deref() == Some(ip)
    }
}

pub type ClassifierFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<FlaggedEntry>, ClassifierError>> + Send + 'a>>;

/// Scores a batch of access entries.
pub trait AnomalyClassifier: Send + Sync {
    fn classify<'a>(&'a self, entries: &'a [AccessLogEntry]) -> ClassifierFuture<'a>;

    fn name(&self) -> &str;
}

/// Classifier run as a child process: entries on stdin, flagged entries on stdout.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from a whitespace-separated command line.
    pub fn from_command_line(command: &str, timeout: Duration) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), timeout))
    }

    async fn run(&self, entries: &[AccessLogEntry]) -> Result<Vec<FlaggedEntry>, ClassifierError> {
        let input = serde_json::to_vec(entries)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClassifierError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&input).await {
                Ok(()) => {}
                // The classifier may exit without reading everything
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ClassifierError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(stdout.trim())?)
    }
}

impl AnomalyClassifier for CommandClassifier {
    fn classify<'a>(&'a self, entries: &'a [AccessLogEntry]) -> ClassifierFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.run(entries)).await {
                Ok(result) => result,
                Err(_) => Err(ClassifierError::Timeout(self.timeout)),
            }
        })
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AccessOutcome;
    use chrono::Utc;

    fn sh(script: &str, timeout: Duration) -> CommandClassifier {
        CommandClassifier::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    fn entries() -> Vec<AccessLogEntry> {
        vec![AccessLogEntry {
            sequence: 1,
            user_id: "alice".to_string(),
            file_id: "f".to_string(),
            ip: "10.0.0.1".to_string(),
            timestamp: Utc::now(),
            outcome: AccessOutcome::attempted(),
        }]
    }

    #[tokio::test]
    async fn parses_flagged_entries() {
        let classifier = sh(
            r#"cat > /dev/null; echo '[{"userId":"alice","ip":"10.0.0.1","extra":1}]'"#,
            Duration::from_secs(5),
        );
        let flagged = classifier.classify(&entries()).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].matches("alice", "10.0.0.1"));
        assert!(!flagged[0].matches("alice", "10.0.0.2"));
    }

    #[tokio::test]
    async fn receives_entries_on_stdin() {
        // Echo the input back: every entry is flagged
        let classifier = sh("cat", Duration::from_secs(5));
        let flagged = classifier.classify(&entries()).await.unwrap();
        assert!(flagged[0].matches("alice", "10.0.0.1"));
    }

    #[tokio::test]
    async fn empty_output_flags_nothing() {
        let classifier = sh("cat > /dev/null", Duration::from_secs(5));
        assert!(classifier.classify(&entries()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let classifier = sh("echo boom >&2; exit 3", Duration::from_secs(5));
        match classifier.classify(&entries()).await {
            Err(ClassifierError::Failed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_classifier_times_out() {
        let classifier = sh("sleep 5", Duration::from_millis(100));
        assert!(matches!(
            classifier.classify(&entries()).await,
            Err(ClassifierError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let classifier = CommandClassifier::new("/nonexistent/classifier", vec![], Duration::from_secs(1));
        assert!(matches!(
            classifier.classify(&entries()).await,
            Err(ClassifierError::Spawn(_))
        ));
    }

    #[test]
    fn command_line_is_split() {
        let c = CommandClassifier::from_command_line("python3 ai/detect.py --json", Duration::from_secs(1))
            .unwrap();
        assert_eq!(c.program, "python3");
        assert_eq!(c.args, vec!["ai/detect.py", "--json"]);
        assert!(CommandClassifier::from_command_line("   ", Duration::from_secs(1)).is_none());
    }
}
