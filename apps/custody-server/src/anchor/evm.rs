// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registry contract on an EVM chain.

use std::str::FromStr;

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
    sol,
};
use chrono::Utc;

use super::{AnchorError, AnchorFuture, AnchorReceipt, IntegrityAnchor};

sol! {
    #[sol(rpc)]
    interface IFileRegistry {
        function storeFileHash(string fileHash) external;
        function checkFileHash(string fileHash) external view returns (bool);
    }
}

const BACKEND: &str = "evm";

/// Client for the file registry contract.
pub struct EvmAnchorClient {
    contract: IFileRegistry::IFileRegistryInstance<DynProvider>,
    address: Address,
}

impl EvmAnchorClient {
    /// Connect to the registry at `contract_address` through `rpc_url`,
    /// signing with the hex private key `signer_key`.
    pub fn new(rpc_url: &str, contract_address: &str, signer_key: &str) -> Result<Self, AnchorError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| AnchorError::InvalidConfig(format!("rpc url: {e}")))?;
        let address = Address::from_str(contract_address)
            .map_err(|e| AnchorError::InvalidConfig(format!("contract address: {e}")))?;
        let signer = PrivateKeySigner::from_str(signer_key.trim_start_matches("0x"))
            .map_err(|_| AnchorError::InvalidConfig("signer key is not a valid private key".to_string()))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            contract: IFileRegistry::new(address, provider),
            address,
        })
    }

    pub fn contract_address(&self) -> Address {
        self.address
    }
}

impl IntegrityAnchor for EvmAnchorClient {
    fn anchor<'a>(&'a self, fingerprint: &'a str) -> AnchorFuture<'a, AnchorReceipt> {
        Box::pin(async move {
            let pending = self
                .contract
                .storeFileHash(fingerprint.to_string())
                .send()
                .await
                .map_err(|e| AnchorError::Contract(e.to_string()))?;

            let receipt = pending
                .get_receipt()
                .await
                .map_err(|e| AnchorError::Rpc(format!("Failed to get receipt: {e}")))?;

            let tx_hash = format!("{:?}", receipt.transaction_hash);
            if !receipt.status() {
                return Err(AnchorError::Contract(format!("transaction {tx_hash} reverted")));
            }

            Ok(AnchorReceipt {
                fingerprint: fingerprint.to_string(),
                transaction_id: Some(tx_hash),
                backend: BACKEND.to_string(),
                anchored_at: Utc::now(),
                already_anchored: false,
            })
        })
    }

    fn is_anchored<'a>(&'a self, fingerprint: &'a str) -> AnchorFuture<'a, bool> {
        Box::pin(async move {
            self.contract
                .checkFileHash(fingerprint.to_string())
                .call()
                .await
                .map_err(|e| AnchorError::Contract(e.to_string()))
        })
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
