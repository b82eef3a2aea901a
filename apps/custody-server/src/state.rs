// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tracing::info;

use crate::anchor::{AnchorError, EvmAnchorClient, IntegrityAnchor, LocalAnchorRegistry};
use crate::anomaly::{AnomalyGate, AnomalyRules, AnomalySweeper, CommandClassifier};
use crate::config::AppConfig;
use crate::crypto::CryptoError;
use crate::orchestrator::{AccessOrchestrator, CustodyComponents, CREDENTIAL_KEY_LABEL, FILE_KEY_LABEL};
use crate::second_factor::SecondFactorGate;
use crate::storage::{
    AccessLedger, AccessLedgerError, AlertLog, FsBlobStore, LocalStorage, StagingArea, StorageError,
    StoragePaths,
};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("staging: {0}")]
    Staging(#[from] std::io::Error),

    #[error("access ledger: {0}")]
    Ledger(#[from] AccessLedgerError),

    #[error("anchor: {0}")]
    Anchor(#[from] AnchorError),

    #[error("key derivation: {0}")]
    Crypto(#[from] CryptoError),
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AccessOrchestrator>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Open every store under the data directory and wire the orchestrator.
    ///
    /// Stale staging files left by a previous process are purged here.
    pub fn initialize(config: AppConfig) -> Result<Self, StateError> {
        let paths = StoragePaths::new(&config.data_dir);

        let mut storage = LocalStorage::new(paths.clone());
        storage.initialize()?;

        let staging = StagingArea::new(paths.staging_dir());
        staging.initialize()?;

        let ledger = Arc::new(AccessLedger::open(&paths.access_ledger_db())?);

        let anchor: Arc<dyn IntegrityAnchor> = match &config.evm_anchor {
            Some(evm) => {
                let client = EvmAnchorClient::new(&evm.rpc_url, &evm.contract_address, &evm.signer_key)?;
                info!(
                    rpc_url = %evm.rpc_url,
                    contract = %client.contract_address(),
                    "Anchoring fingerprints on-chain"
                );
                Arc::new(client)
            }
            None => {
                info!("Anchoring fingerprints in the local registry");
                Arc::new(LocalAnchorRegistry::open(&paths.anchor_registry_db())?)
            }
        };

        let mut anomaly = AnomalyGate::new(AnomalyRules::new(config.anomaly.thresholds));
        if let Some(command) = &config.anomaly.classifier_command {
            if let Some(classifier) = CommandClassifier::from_command_line(command, config.anomaly.classifier_timeout)
            {
                info!(policy = ?config.anomaly.failure_policy, "External anomaly classifier enabled");
                anomaly = anomaly.with_classifier(Arc::new(classifier), config.anomaly.failure_policy);
            }
        }

        let second_factor = SecondFactorGate::new(
            storage.clone(),
            config.master_key.derive(CREDENTIAL_KEY_LABEL)?,
            config.totp_issuer.clone(),
        );

        let orchestrator = AccessOrchestrator::new(CustodyComponents {
            storage: Arc::new(storage),
            ledger,
            second_factor: Arc::new(second_factor),
            anchor,
            anomaly,
            blobs: Arc::new(FsBlobStore::new(paths.bucket_dir())),
            staging,
            alerts: Arc::new(AlertLog::new(paths)),
            file_key: config.master_key.derive(FILE_KEY_LABEL)?,
        });

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
        })
    }

    /// Background sweeper over the shared ledger, unless disabled.
    pub fn sweeper(&self) -> Option<AnomalySweeper> {
        let interval = self.config.anomaly.sweep_interval?;
        Some(
            AnomalySweeper::new(
                Arc::clone(self.orchestrator.ledger()),
                Arc::clone(self.orchestrator.alert_log()),
                AnomalyRules::new(self.config.anomaly.thresholds),
            )
            .with_interval(interval),
        )
    }
}
