//! Wallet Router Library
//!
//! Authorization and wallet-routing engine: decides whether an on-chain
//! operation runs autonomously with an agent key, goes to the user's wallet
//! for confirmation, or is rejected.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use policy::{Decision, OperationKind, PermissionEvaluator, PolicyStore, WalletRoute};
pub use wallet::{OperationRequest, OperationResult, WalletOrchestrator};
