//! User wallet connectors
//!
//! A connector is a bridge to a human-controlled signer (a browser extension
//! or mobile wallet). Sending through a connector means the user sees and
//! approves the transaction.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::address::is_valid_address;
use super::chain::random_tx_hash;

/// Supported user wallet families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    MetaMask,
    Okx,
    Coinbase,
    Trust,
    Phantom,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 5] = [
        ConnectorKind::MetaMask,
        ConnectorKind::Okx,
        ConnectorKind::Coinbase,
        ConnectorKind::Trust,
        ConnectorKind::Phantom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::MetaMask => "metamask",
            ConnectorKind::Okx => "okx",
            ConnectorKind::Coinbase => "coinbase",
            ConnectorKind::Trust => "trust",
            ConnectorKind::Phantom => "phantom",
        }
    }

    /// Display name shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            ConnectorKind::MetaMask => "MetaMask",
            ConnectorKind::Okx => "OKX Wallet",
            ConnectorKind::Coinbase => "Coinbase Wallet",
            ConnectorKind::Trust => "Trust Wallet",
            ConnectorKind::Phantom => "Phantom",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "metamask" | "meta_mask" => Ok(ConnectorKind::MetaMask),
            "okx" => Ok(ConnectorKind::Okx),
            "coinbase" => Ok(ConnectorKind::Coinbase),
            "trust" => Ok(ConnectorKind::Trust),
            "phantom" => Ok(ConnectorKind::Phantom),
            other => Err(Error::UnsupportedConnector(other.to_string())),
        }
    }
}

/// Chain id for a network name, if known
pub fn chain_id_for(network: &str) -> Option<u64> {
    match network {
        "ethereum" | "ethereum_mainnet" => Some(1),
        "ethereum_sepolia" => Some(11_155_111),
        "base" | "base_mainnet" => Some(8_453),
        "base_sepolia" => Some(84_532),
        _ => None,
    }
}

/// Connection state reported by a connector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub kind: Option<ConnectorKind>,
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            kind: None,
            address: None,
            chain_id: None,
            error: None,
        }
    }
}

/// Transaction handed to a user wallet for approval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxParams {
    pub to: String,

    /// Decimal amount in display units
    pub value: String,

    pub token_symbol: String,
    pub network: String,

    /// Calldata, `0x` when empty
    pub data: String,
}

/// Bridge to a human-controlled signer
#[async_trait]
pub trait UserConnector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    async fn connect(&self) -> Result<ConnectionStatus>;

    async fn disconnect(&self) -> Result<()>;

    /// Ask the user to approve and send; returns the transaction hash
    async fn send_transaction(&self, tx: &TxParams) -> Result<String>;

    async fn status(&self) -> ConnectionStatus;
}

#[derive(Debug, Clone)]
struct Session {
    address: String,
    chain_id: u64,
}

/// Connector that approves everything without a real wallet
#[derive(Debug)]
pub struct SimulatedConnector {
    kind: ConnectorKind,
    account: Option<String>,
    chain_id: u64,
    session: RwLock<Option<Session>>,
}

impl SimulatedConnector {
    /// Connector with no account; `connect` fails until one is set
    pub fn new(kind: ConnectorKind) -> Self {
        Self {
            kind,
            account: None,
            chain_id: 84_532,
            session: RwLock::new(None),
        }
    }

    pub fn with_account(mut self, address: impl Into<String>) -> Self {
        self.account = Some(address.into());
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }
}

#[async_trait]
impl UserConnector for SimulatedConnector {
    fn kind(&self) -> ConnectorKind {
        self.kind
    }

    async fn connect(&self) -> Result<ConnectionStatus> {
        let Some(address) = self.account.clone() else {
            return Err(Error::Connector(format!(
                "{} returned no account",
                self.kind.display_name()
            )));
        };
        if !is_valid_address(&address) {
            return Err(Error::InvalidAddress(address));
        }

        *self.session.write().await = Some(Session {
            address,
            chain_id: self.chain_id,
        });
        Ok(self.status().await)
    }

    async fn disconnect(&self) -> Result<()> {
        *self.session.write().await = None;
        Ok(())
    }

    async fn send_transaction(&self, tx: &TxParams) -> Result<String> {
        let session = self.session.read().await;
        let Some(session) = session.as_ref() else {
            return Err(Error::UserWalletNotConnected);
        };

        if let Some(expected) = chain_id_for(&tx.network) {
            if expected != session.chain_id {
                warn!(
                    connector = %self.kind,
                    expected,
                    connected = session.chain_id,
                    "User wallet is on a different chain"
                );
            }
        }

        let hash = random_tx_hash();
        info!(
            connector = %self.kind,
            from = %session.address,
            to = %tx.to,
            value = %tx.value,
            hash = %hash,
            "User approved transaction"
        );
        Ok(hash)
    }

    async fn status(&self) -> ConnectionStatus {
        match self.session.read().await.as_ref() {
            Some(session) => ConnectionStatus {
                is_connected: true,
                kind: Some(self.kind),
                address: Some(session.address.clone()),
                chain_id: Some(session.chain_id),
                error: None,
            },
            None => ConnectionStatus::disconnected(),
        }
    }
}

/// Registered connectors and the one currently in use
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<ConnectorKind, Arc<dyn UserConnector>>,
    current: Option<ConnectorKind>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn UserConnector>) {
        let kind = connector.kind();
        self.connectors.insert(kind, connector);
        info!(connector = %kind, "Registered wallet connector");
    }

    pub fn supported(&self) -> Vec<ConnectorKind> {
        self.connectors.keys().copied().collect()
    }

    /// Connect `kind`, dropping any other active connection first
    pub async fn connect(&mut self, kind: ConnectorKind) -> Result<ConnectionStatus> {
        let connector = self
            .connectors
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::UnsupportedConnector(kind.to_string()))?;

        // The current connection stays in place until the new one is up
        let status = connector.connect().await?;
        if status.address.is_none() {
            if let Err(e) = connector.disconnect().await {
                warn!(connector = %kind, error = %e, "Failed to tear down connection without account");
            }
            return Err(Error::Connector(format!("{} returned no account", kind)));
        }

        if let Some(previous) = self.current.filter(|previous| *previous != kind) {
            if let Some(old) = self.connectors.get(&previous) {
                if let Err(e) = old.disconnect().await {
                    warn!(connector = %previous, error = %e, "Failed to disconnect previous wallet");
                }
            }
        }

        self.current = Some(kind);
        info!(
            connector = %kind,
            address = ?status.address,
            chain_id = ?status.chain_id,
            "User wallet connected"
        );
        Ok(status)
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(kind) = self.current.take() {
            if let Some(connector) = self.connectors.get(&kind) {
                connector.disconnect().await?;
            }
            info!(connector = %kind, "User wallet disconnected");
        }
        Ok(())
    }

    /// Connector in use, if one is connected
    pub fn current(&self) -> Option<Arc<dyn UserConnector>> {
        self.current
            .and_then(|kind| self.connectors.get(&kind))
            .cloned()
    }

    pub async fn status(&self) -> ConnectionStatus {
        match self.current() {
            Some(connector) => connector.status().await,
            None => ConnectionStatus::disconnected(),
        }
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.supported())
            .field("current", &self.current)
            .finish()
    }
}
