//! Wallet orchestrator
//!
//! Entry point for executing operations. Each request is evaluated against
//! the [`PolicyStore`] and dispatched to:
//! - the current agent signer through a [`ChainClient`] (AGENT)
//! - the connected user wallet through a [`UserConnector`] (USER)
//! - nowhere (REJECTED)
//!
//! Failures of either collaborator end up in [`OperationResult::error`];
//! `execute_operation` itself never fails.
//!
//! # Daily limit
//!
//! Evaluation only reads the ledger. When the evaluator picks AGENT the
//! amount is reserved against the wallet label in one atomic step; if two
//! calls race for the last of the allowance, the loser is handed to the
//! user. The reservation is committed when the chain confirms and released
//! otherwise (or committed right away with [`LedgerCommit::OnDecision`]).
//! A cancelled `execute_operation` drops its reservation, which releases it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::policy::evaluator::to_native_units;
use crate::policy::{
    Decision, DecisionReason, DailyUsageReport, OperationContext, OperationKind,
    PermissionEvaluator, PolicyStore, Reservation, Rule, RulePatch, WalletRoute,
};

use super::address::is_valid_address;
use super::chain::{ChainClient, TransferRequest};
use super::connector::{ConnectionStatus, ConnectorKind, ConnectorRegistry, TxParams, UserConnector};
use super::keystore::{AgentKeyStore, AgentSigner, InMemoryKeyStore};
use super::types::{OperationRecord, OperationRequest, OperationResult, WalletInfo, WalletKind};

/// When an agent operation is charged against the daily limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerCommit {
    /// Only once the chain reports success
    #[default]
    OnSuccess,

    /// As soon as the evaluator routes to the agent
    OnDecision,
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub ledger_commit: LedgerCommit,

    /// Maximum number of history records kept
    pub history_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            ledger_commit: LedgerCommit::OnSuccess,
            history_limit: 1000,
        }
    }
}

/// Routes operations to agent or user wallets
pub struct WalletOrchestrator {
    /// Rules, address lists and ledger
    store: Arc<RwLock<PolicyStore>>,

    /// Agent signers
    keystore: RwLock<Box<dyn AgentKeyStore>>,

    /// Submits agent transactions
    chain: Arc<dyn ChainClient>,

    /// User wallet connectors
    connectors: RwLock<ConnectorRegistry>,

    /// Label given to the connected user wallet
    user_label: RwLock<Option<String>>,

    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,

    /// Newest first
    history: RwLock<Vec<OperationRecord>>,
}

impl WalletOrchestrator {
    pub fn new(store: PolicyStore, chain: Arc<dyn ChainClient>) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            keystore: RwLock::new(Box::new(InMemoryKeyStore::new())),
            chain,
            connectors: RwLock::new(ConnectorRegistry::new()),
            user_label: RwLock::new(None),
            clock: Arc::new(SystemClock),
            settings: OrchestratorSettings::default(),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key_store(mut self, keystore: Box<dyn AgentKeyStore>) -> Self {
        self.keystore = RwLock::new(keystore);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shared handle to the policy store
    pub fn store(&self) -> Arc<RwLock<PolicyStore>> {
        Arc::clone(&self.store)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Evaluate and dispatch one operation
    pub async fn execute_operation(&self, request: OperationRequest) -> OperationResult {
        let now = self.clock.now();

        if !is_valid_address(&request.to_address) {
            let reason = format!("invalid recipient address: {}", request.to_address);
            warn!(to = %request.to_address, "Rejected operation with invalid address");
            let result = OperationResult::failed(WalletRoute::Rejected, reason.clone(), reason);
            self.record(&request, &result, None, now).await;
            return result;
        }

        let (decision, reservation) = self.decide(&request, now).await;

        let (result, signer) = match decision.route {
            WalletRoute::Rejected => {
                warn!(
                    kind = %request.kind,
                    to = %request.to_address,
                    reason = %decision.reason,
                    "Operation rejected"
                );
                let message = decision.message();
                (
                    OperationResult::failed(WalletRoute::Rejected, message.clone(), message),
                    None,
                )
            }
            WalletRoute::Agent => self.execute_agent(&request, &decision, reservation).await,
            WalletRoute::User => self.execute_user(&request, &decision).await,
        };

        self.record(&request, &result, signer, now).await;
        result
    }

    /// Evaluate `request` and, for agent routes, hold the daily allowance
    async fn decide(
        &self,
        request: &OperationRequest,
        now: DateTime<Utc>,
    ) -> (Decision, Option<Reservation>) {
        let store = self.store.read().await;
        let ctx = build_context(request, &store, now);
        let decision = PermissionEvaluator::evaluate(&ctx, &store);

        if decision.route != WalletRoute::Agent {
            return (decision, None);
        }

        let label = store.label_or_default(request.from_wallet_label.as_deref());
        let amount =
            to_native_units(&request.amount, &request.token_symbol).unwrap_or(Decimal::ZERO);

        match store
            .ledger()
            .try_reserve(label, amount, store.daily_limit(), now.date_naive())
        {
            Ok(reservation) => match self.settings.ledger_commit {
                LedgerCommit::OnSuccess => (decision, Some(reservation)),
                LedgerCommit::OnDecision => {
                    reservation.commit();
                    (decision, None)
                }
            },
            Err(exceeded) => {
                debug!(
                    label = %label,
                    used = %exceeded.used,
                    requested = %exceeded.requested,
                    "Daily allowance taken by a concurrent operation"
                );
                (
                    Decision::user(DecisionReason::DailyLimitReached {
                        used: exceeded.used,
                        requested: exceeded.requested,
                        limit: exceeded.limit,
                    }),
                    None,
                )
            }
        }
    }

    async fn execute_agent(
        &self,
        request: &OperationRequest,
        decision: &Decision,
        reservation: Option<Reservation>,
    ) -> (OperationResult, Option<String>) {
        let message = decision.message();
        let signer = self
            .keystore
            .read()
            .await
            .current_signer()
            .filter(AgentSigner::has_private_key);

        let Some(signer) = signer else {
            warn!(kind = %request.kind, "No agent wallet configured");
            release(reservation);
            return (
                OperationResult::failed(
                    WalletRoute::Agent,
                    Error::NoAgentWallet.to_string(),
                    message,
                ),
                None,
            );
        };

        let transfer = TransferRequest {
            to: request.to_address.clone(),
            amount: request.amount.clone(),
            token_symbol: request.token_symbol.clone(),
            network: request.network.clone(),
        };
        let signer_label = Some(signer.label().to_string());

        let result = match self.chain.send_transaction(&transfer, &signer).await {
            Ok(tx) if tx.is_success() => {
                commit(reservation);
                let hash = tx.transaction_hash.unwrap_or_default();
                info!(
                    kind = %request.kind,
                    to = %request.to_address,
                    amount = %request.amount,
                    token = %request.token_symbol,
                    signer = %signer.label(),
                    hash = %hash,
                    "Executed operation with agent wallet"
                );
                OperationResult::succeeded(WalletRoute::Agent, hash, message)
            }
            Ok(tx) => {
                release(reservation);
                let error = tx
                    .error
                    .unwrap_or_else(|| "transaction failed".to_string());
                warn!(signer = %signer.label(), error = %error, "Agent transaction failed");
                OperationResult::failed(WalletRoute::Agent, error, message)
            }
            Err(e) => {
                release(reservation);
                warn!(
                    signer = %signer.label(),
                    error = %e,
                    retryable = e.is_retryable(),
                    "Agent transaction submission failed"
                );
                OperationResult::failed(WalletRoute::Agent, e.to_string(), message)
            }
        };

        (result.with_confirmation(false), signer_label)
    }

    async fn execute_user(
        &self,
        request: &OperationRequest,
        decision: &Decision,
    ) -> (OperationResult, Option<String>) {
        let message = decision.message();
        let connector = self.connectors.read().await.current();

        let Some(connector) = connector else {
            info!(
                kind = %request.kind,
                reason = %decision.reason,
                "User confirmation needed but no wallet connected"
            );
            return (
                OperationResult::failed(
                    WalletRoute::User,
                    Error::UserWalletNotConnected.to_string(),
                    message,
                )
                    .with_confirmation(true),
                None,
            );
        };

        let tx = TxParams {
            to: request.to_address.clone(),
            value: request.amount.clone(),
            token_symbol: request.token_symbol.clone(),
            network: request.network.clone(),
            data: "0x".to_string(),
        };
        let signer_label = Some(connector.kind().to_string());

        let result = match connector.send_transaction(&tx).await {
            Ok(hash) => {
                info!(
                    kind = %request.kind,
                    to = %request.to_address,
                    amount = %request.amount,
                    connector = %connector.kind(),
                    hash = %hash,
                    "Executed operation with user wallet"
                );
                OperationResult::succeeded(WalletRoute::User, hash, message)
            }
            Err(e) => {
                warn!(connector = %connector.kind(), error = %e, "User wallet transaction failed");
                OperationResult::failed(WalletRoute::User, e.to_string(), message)
            }
        };

        (
            result.with_confirmation(decision.requires_confirmation),
            signer_label,
        )
    }

    async fn record(
        &self,
        request: &OperationRequest,
        result: &OperationResult,
        signer: Option<String>,
        at: DateTime<Utc>,
    ) {
        let record = OperationRecord {
            id: Uuid::new_v4().to_string(),
            request: request.clone(),
            route: result.route,
            success: result.success,
            transaction_hash: result.transaction_hash.clone(),
            error: result.error.clone(),
            reason: result.message.clone(),
            signer,
            timestamp: at,
        };

        let mut history = self.history.write().await;
        history.insert(0, record);
        history.truncate(self.settings.history_limit);
    }

    /// Most recent operations, newest first
    pub async fn history(&self, limit: usize) -> Vec<OperationRecord> {
        let history = self.history.read().await;
        history.iter().take(limit).cloned().collect()
    }

    // =========================================================================
    // Policy management
    // =========================================================================

    pub async fn add_trusted_address(&self, address: &str) {
        self.store.write().await.add_trusted_address(address);
        info!(address = %address, "Added trusted address");
    }

    pub async fn remove_trusted_address(&self, address: &str) -> bool {
        self.store.write().await.remove_trusted_address(address)
    }

    pub async fn is_trusted_address(&self, address: &str) -> bool {
        self.store.read().await.is_trusted_address(address)
    }

    pub async fn trusted_addresses(&self) -> Vec<String> {
        self.store.read().await.trusted_addresses()
    }

    pub async fn add_blacklisted_address(&self, address: &str) {
        self.store.write().await.add_blacklisted_address(address);
        info!(address = %address, "Added blacklisted address");
    }

    pub async fn remove_blacklisted_address(&self, address: &str) -> bool {
        self.store.write().await.remove_blacklisted_address(address)
    }

    pub async fn blacklisted_addresses(&self) -> Vec<String> {
        self.store.read().await.blacklisted_addresses()
    }

    pub async fn update_rule(&self, kind: OperationKind, patch: &RulePatch) -> Result<Rule> {
        self.store.write().await.update_rule(kind, patch)
    }

    pub async fn get_rule(&self, kind: OperationKind) -> Option<Rule> {
        self.store.read().await.rule(kind).cloned()
    }

    pub async fn remove_rule(&self, kind: OperationKind) -> Option<Rule> {
        self.store.write().await.remove_rule(kind)
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.store.read().await.rules()
    }

    /// Daily usage for `label` as of the orchestrator's clock
    pub async fn daily_limit_usage(&self, label: &str) -> DailyUsageReport {
        let today = self.clock.now().date_naive();
        self.store.read().await.daily_usage(label, today)
    }

    pub async fn reset_daily_limits(&self) {
        self.store.read().await.reset_daily_limits();
    }

    // =========================================================================
    // Agent wallets
    // =========================================================================

    /// Register an agent wallet from an existing key
    pub async fn add_agent_wallet(
        &self,
        label: &str,
        private_key: &str,
        address: Option<&str>,
    ) -> Result<()> {
        let mut signer = AgentSigner::new(label, private_key)?;
        if let Some(address) = address {
            signer = signer.with_address(address)?;
        }
        self.keystore.write().await.add_signer(signer);
        Ok(())
    }

    /// Register an agent wallet with a freshly generated key and make it current
    pub async fn create_agent_wallet(&self, label: &str) -> WalletInfo {
        let signer = AgentSigner::generate(label);
        let address = signer.address().to_string();

        let mut keystore = self.keystore.write().await;
        keystore.add_signer(signer);
        let is_current = keystore.set_current(label);
        info!(label = %label, address = %address, "Created agent wallet");

        WalletInfo {
            label: label.to_string(),
            kind: WalletKind::Agent,
            address: Some(address),
            is_current,
        }
    }

    pub async fn switch_agent_wallet(&self, label: &str) -> bool {
        self.keystore.write().await.set_current(label)
    }

    pub async fn remove_agent_wallet(&self, label: &str) -> bool {
        self.keystore.write().await.remove_signer(label)
    }

    // =========================================================================
    // User wallets
    // =========================================================================

    pub async fn register_connector(&self, connector: Arc<dyn UserConnector>) {
        self.connectors.write().await.register(connector);
    }

    pub async fn supported_connectors(&self) -> Vec<ConnectorKind> {
        self.connectors.read().await.supported()
    }

    /// Connect the user wallet of `kind` and remember it as `label`
    pub async fn connect_user_wallet(
        &self,
        kind: ConnectorKind,
        label: &str,
    ) -> Result<ConnectionStatus> {
        let status = self.connectors.write().await.connect(kind).await?;
        if !status.is_connected || status.address.is_none() {
            return Err(Error::Connector(
                status
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} did not connect", kind)),
            ));
        }

        *self.user_label.write().await = Some(label.to_string());
        Ok(status)
    }

    pub async fn disconnect_user_wallet(&self) -> Result<()> {
        self.connectors.write().await.disconnect().await?;
        *self.user_label.write().await = None;
        Ok(())
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.connectors.read().await.status().await
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Agent wallets followed by the connected user wallet
    pub async fn list_wallets(&self) -> Vec<WalletInfo> {
        let mut wallets: Vec<WalletInfo> = self
            .keystore
            .read()
            .await
            .list()
            .into_iter()
            .map(|entry| WalletInfo {
                label: entry.label,
                kind: WalletKind::Agent,
                address: Some(entry.address),
                is_current: entry.is_current,
            })
            .collect();

        let status = self.connection_status().await;
        if let (true, Some(kind)) = (status.is_connected, status.kind) {
            let label = self
                .user_label
                .read()
                .await
                .clone()
                .unwrap_or_else(|| kind.to_string());
            wallets.push(WalletInfo {
                label,
                kind: WalletKind::User(kind),
                address: status.address,
                is_current: true,
            });
        }

        wallets
    }

    /// First current wallet (agent preferred)
    pub async fn current_wallet(&self) -> Option<WalletInfo> {
        self.list_wallets().await.into_iter().find(|w| w.is_current)
    }
}

fn commit(reservation: Option<Reservation>) {
    if let Some(reservation) = reservation {
        reservation.commit();
    }
}

fn release(reservation: Option<Reservation>) {
    if let Some(reservation) = reservation {
        reservation.release();
    }
}

/// Context for `request`, with address flags taken from `store`
pub fn build_context(
    request: &OperationRequest,
    store: &PolicyStore,
    at: DateTime<Utc>,
) -> OperationContext {
    let is_trusted = store.is_trusted_address(&request.to_address);
    OperationContext {
        kind: request.kind,
        amount: request.amount.clone(),
        token_symbol: request.token_symbol.clone(),
        to_address: request.to_address.clone(),
        network: request.network.clone(),
        from_wallet_label: request.from_wallet_label.clone(),
        is_trusted_address: is_trusted,
        is_new_address: !is_trusted,
        evaluation_time: at,
    }
}
