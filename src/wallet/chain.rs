//! Chain client used by agent wallets
//!
//! The router hands a signed-by-agent transfer to a [`ChainClient`] and gets
//! back a transaction hash or a failure. How the transaction is built and
//! broadcast is up to the implementation.

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::keystore::AgentSigner;

/// Transfer to be signed by an agent wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub to: String,

    /// Decimal amount in the token's display units
    pub amount: String,

    pub token_symbol: String,
    pub network: String,
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Result returned by a chain client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub transaction_hash: Option<String>,
    pub status: TxStatus,
    pub error: Option<String>,
}

impl TxResult {
    pub fn confirmed(hash: impl Into<String>) -> Self {
        Self {
            transaction_hash: Some(hash.into()),
            status: TxStatus::Confirmed,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            transaction_hash: None,
            status: TxStatus::Failed,
            error: Some(error.into()),
        }
    }

    /// Broadcast went through (pending or confirmed)
    pub fn is_success(&self) -> bool {
        self.status != TxStatus::Failed && self.transaction_hash.is_some()
    }
}

/// Signs and submits transfers for agent wallets
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn send_transaction(
        &self,
        request: &TransferRequest,
        signer: &AgentSigner,
    ) -> Result<TxResult>;
}

/// Random 32-byte hash, hex with `0x` prefix
pub fn random_tx_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// Chain client that never touches a network
///
/// Every submission is confirmed with a random hash. Used by the CLI's
/// `simulate` command and by tests.
#[derive(Debug, Clone, Default)]
pub struct SimulatedChainClient {
    fail_with: Option<String>,
}

impl SimulatedChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose every submission fails with `error`
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            fail_with: Some(error.into()),
        }
    }
}

#[async_trait]
impl ChainClient for SimulatedChainClient {
    async fn send_transaction(
        &self,
        request: &TransferRequest,
        signer: &AgentSigner,
    ) -> Result<TxResult> {
        debug!(
            signer = %signer.label(),
            to = %request.to,
            amount = %request.amount,
            token = %request.token_symbol,
            network = %request.network,
            "Simulating transaction"
        );

        if !signer.has_private_key() {
            return Err(Error::InvalidPrivateKey(signer.label().to_string()));
        }

        if let Some(error) = &self.fail_with {
            return Err(Error::ChainSubmission(error.clone()));
        }

        let hash = random_tx_hash();
        info!(hash = %hash, network = %request.network, "Simulated transaction confirmed");
        Ok(TxResult::confirmed(hash))
    }
}
