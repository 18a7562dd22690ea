//! Wallet routing
//!
//! Executes operations on behalf of a caller using either a system-held
//! agent key or the user's own wallet, as decided by the policy layer.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──► AgentKeyStore + ChainClient   (AGENT)
//! WalletOrchestrator ┤
//!        ↑           └──► ConnectorRegistry → UserConnector (USER)
//!   PolicyStore
//! ```
//!
//! # Security
//!
//! Agent keys never leave the key store except to sign through the chain
//! client, and are redacted from `Debug` output. A rejected operation
//! never reaches either signer.

pub mod address;
pub mod chain;
pub mod connector;
pub mod keystore;
pub mod orchestrator;
pub mod types;

pub use chain::{ChainClient, SimulatedChainClient, TransferRequest, TxResult, TxStatus};
pub use connector::{
    ConnectionStatus, ConnectorKind, ConnectorRegistry, SimulatedConnector, TxParams,
    UserConnector,
};
pub use keystore::{AgentKeyStore, AgentSigner, InMemoryKeyStore};
pub use orchestrator::{build_context, LedgerCommit, OrchestratorSettings, WalletOrchestrator};
pub use types::{OperationRecord, OperationRequest, OperationResult, WalletInfo, WalletKind};
