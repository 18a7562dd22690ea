//! Core types for wallet routing
//!
//! Requests going into the orchestrator, results coming out, and the audit
//! trail it keeps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{OperationKind, WalletRoute};

use super::connector::ConnectorKind;

/// One operation requested by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub to_address: String,

    /// Decimal amount in the token's display units
    pub amount: String,

    pub token_symbol: String,
    pub network: String,

    /// Agent wallet label charged against the daily limit
    #[serde(default)]
    pub from_wallet_label: Option<String>,
}

impl OperationRequest {
    /// Request with the given token and network
    pub fn new(
        kind: OperationKind,
        to_address: impl Into<String>,
        amount: impl Into<String>,
        token_symbol: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            to_address: to_address.into(),
            amount: amount.into(),
            token_symbol: token_symbol.into(),
            network: network.into(),
            from_wallet_label: None,
        }
    }

    pub fn from_wallet(mut self, label: impl Into<String>) -> Self {
        self.from_wallet_label = Some(label.into());
        self
    }
}

/// What happened to an operation
///
/// `route` is where the operation went, not necessarily where the evaluator
/// first sent it: an agent decision that loses the daily-limit race is
/// handed to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub route: WalletRoute,
    pub transaction_hash: Option<String>,
    pub error: Option<String>,
    pub message: String,
    pub requires_user_confirmation: Option<bool>,
}

impl OperationResult {
    pub fn succeeded(route: WalletRoute, hash: String, message: impl Into<String>) -> Self {
        Self {
            success: true,
            route,
            transaction_hash: Some(hash),
            error: None,
            message: message.into(),
            requires_user_confirmation: None,
        }
    }

    pub fn failed(route: WalletRoute, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            route,
            transaction_hash: None,
            error: Some(error.into()),
            message: message.into(),
            requires_user_confirmation: None,
        }
    }

    pub fn with_confirmation(mut self, required: bool) -> Self {
        self.requires_user_confirmation = Some(required);
        self
    }
}

/// Audit entry for one executed operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    /// UUID v4
    pub id: String,

    pub request: OperationRequest,
    pub route: WalletRoute,
    pub success: bool,
    pub transaction_hash: Option<String>,
    pub error: Option<String>,

    /// Decision reason
    pub reason: String,

    /// Agent wallet or connector that handled it
    pub signer: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// Kind of wallet known to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    Agent,
    User(ConnectorKind),
}

impl std::fmt::Display for WalletKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletKind::Agent => write!(f, "agent"),
            WalletKind::User(kind) => write!(f, "user ({})", kind),
        }
    }
}

/// Summary of a wallet for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletInfo {
    pub label: String,
    pub kind: WalletKind,
    pub address: Option<String>,
    pub is_current: bool,
}
