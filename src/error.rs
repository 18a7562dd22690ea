//! Error types for the wallet router

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet router
///
/// Policy outcomes (rejection, confirmation required) are never errors;
/// they are carried by [`crate::policy::Decision`].
#[derive(Error, Debug)]
pub enum Error {
    // Input validation errors
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid private key for wallet {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Unknown operation kind: {0}")]
    UnknownOperationKind(String),

    // Wallet errors
    #[error("no agent wallet configured")]
    NoAgentWallet,

    #[error("user wallet not connected")]
    UserWalletNotConnected,

    #[error("Unsupported wallet connector: {0}")]
    UnsupportedConnector(String),

    #[error("Wallet connector error: {0}")]
    Connector(String),

    // Chain errors
    #[error("Transaction submission failed: {0}")]
    ChainSubmission(String),

    #[error("Chain RPC error: {0}")]
    Rpc(String),

    #[error("Chain RPC timeout after {0}ms")]
    RpcTimeout(u64),
}

impl Error {
    /// Check if this error is transient (the caller may resubmit)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_) | Error::RpcTimeout(_) | Error::ChainSubmission(_)
        )
    }

    /// Check if this error means the router is not set up for the operation
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::NoAgentWallet
                | Error::UserWalletNotConnected
                | Error::UnsupportedConnector(_)
        )
    }
}
