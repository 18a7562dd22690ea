//! CLI command implementations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dialoguer::Confirm;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::policy::{Decision, OperationKind, PermissionEvaluator, WalletRoute};
use crate::wallet::address::{is_valid_address, short_address};
use crate::wallet::chain::random_tx_hash;
use crate::wallet::{
    build_context, ConnectorKind, OperationRequest, OperationResult, SimulatedChainClient,
    SimulatedConnector, WalletOrchestrator,
};

/// Operation described on the command line
#[derive(Debug, Clone, clap::Args)]
pub struct OperationArgs {
    /// Operation kind: transfer, defi, contract_call, nft, swap
    pub kind: String,

    /// Recipient address (0x...)
    pub to: String,

    /// Amount in token units, e.g. 0.05
    pub amount: String,

    /// Token symbol (default from config)
    #[arg(long)]
    pub token: Option<String>,

    /// Network (default from config)
    #[arg(long)]
    pub network: Option<String>,

    /// Agent wallet label charged against the daily limit
    #[arg(long)]
    pub label: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl OperationArgs {
    fn to_request(&self, config: &Config) -> Result<OperationRequest> {
        let kind: OperationKind = self.kind.parse()?;
        if !is_valid_address(&self.to) {
            anyhow::bail!("Invalid recipient address: {}", self.to);
        }

        let mut request = OperationRequest::new(
            kind,
            self.to.clone(),
            self.amount.clone(),
            self.token
                .clone()
                .unwrap_or_else(|| config.wallet.default_token.clone()),
            self.network
                .clone()
                .unwrap_or_else(|| config.wallet.default_network.clone()),
        );
        if let Some(label) = &self.label {
            request = request.from_wallet(label.clone());
        }
        Ok(request)
    }
}

/// Evaluate an operation without executing it
pub fn evaluate(
    config: &Config,
    args: &OperationArgs,
    at: Option<&str>,
    trusted: bool,
) -> Result<()> {
    let request = args.to_request(config)?;
    let mut store = config.build_store()?;
    if trusted {
        store.add_trusted_address(&request.to_address);
    }

    let at = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --at timestamp: {}", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let ctx = build_context(&request, &store, at);
    let decision = PermissionEvaluator::evaluate(&ctx, &store);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    print_decision(&request, &decision);

    let label = store.label_or_default(request.from_wallet_label.as_deref());
    let usage = store.daily_usage(label, at.date_naive());
    println!(
        "  Daily usage ({}): {} / {} (remaining {})",
        label, usage.used, usage.limit, usage.remaining
    );

    Ok(())
}

/// Execute an operation against simulated wallets
pub async fn simulate(config: &Config, args: &OperationArgs, yes: bool) -> Result<()> {
    let request = args.to_request(config)?;
    let store = config.build_store()?;

    let orchestrator = WalletOrchestrator::new(store, Arc::new(SimulatedChainClient::new()))
        .with_settings(config.orchestrator_settings());

    match config.agent_private_key() {
        Some(key) => orchestrator.add_agent_wallet("agent", &key, None).await?,
        None => {
            warn!(
                env = %config.wallet.agent_key_env,
                "No agent key configured, generating a throwaway one"
            );
            orchestrator.create_agent_wallet("agent").await;
        }
    }

    // Preview the route so the user can decline before anything is sent
    let decision = {
        let store = orchestrator.store();
        let store = store.read().await;
        let ctx = build_context(&request, &store, Utc::now());
        PermissionEvaluator::evaluate(&ctx, &store)
    };
    if !args.json {
        print_decision(&request, &decision);
    }

    if decision.route == WalletRoute::User {
        if !yes {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Approve {} {} to {} in your wallet? ({})",
                    request.amount,
                    request.token_symbol,
                    short_address(&request.to_address),
                    decision.reason
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                info!("Operation cancelled by user");
                println!("Cancelled.");
                return Ok(());
            }
        }

        // Simulated account: first 20 bytes of a random hash
        let account = random_tx_hash()[..42].to_string();
        orchestrator
            .register_connector(Arc::new(
                SimulatedConnector::new(ConnectorKind::MetaMask).with_account(account),
            ))
            .await;
        orchestrator
            .connect_user_wallet(ConnectorKind::MetaMask, "user")
            .await?;
    }

    let result = orchestrator.execute_operation(request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.success && result.route != WalletRoute::Rejected {
        anyhow::bail!(
            "Operation failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}

/// Show the effective rule table
pub fn rules(config: &Config) -> Result<()> {
    let store = config.build_store()?;

    println!("\n=== AUTHORIZATION RULES ===\n");
    println!(
        "{:<14} {:<10} {:<9} {:<34} {:<18}",
        "KIND", "MAX/TX", "CONFIRM", "NETWORKS", "WINDOW"
    );
    println!("{}", "-".repeat(88));

    for rule in store.rules() {
        println!(
            "{:<14} {:<10} {:<9} {:<34} {:<18}",
            rule.kind.as_str(),
            rule.max_amount_per_tx.to_string(),
            if rule.require_confirmation { "yes" } else { "no" },
            rule.allowed_networks.join(","),
            rule.time_window
                .as_ref()
                .map(|w| w.to_string())
                .unwrap_or_else(|| "any time".to_string())
        );
    }

    println!("\nDaily limit: {} per wallet", store.daily_limit());
    println!("Trusted addresses: {}", store.trusted_addresses().len());
    println!("Blacklisted addresses: {}", store.blacklisted_addresses().len());

    Ok(())
}

/// Show configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn print_decision(request: &OperationRequest, decision: &Decision) {
    println!("\n=== DECISION ===\n");
    println!(
        "  Operation: {} {} {} to {} on {}",
        request.kind,
        request.amount,
        request.token_symbol,
        short_address(&request.to_address),
        request.network
    );
    println!("  Route:     {}", decision.route.to_string().to_uppercase());
    println!("  Reason:    {}", decision.reason);
    println!(
        "  Confirmation required: {}",
        if decision.requires_confirmation { "yes" } else { "no" }
    );
}

fn print_result(result: &OperationResult) {
    println!("\n=== RESULT ===\n");
    println!("  Success: {}", result.success);
    println!("  Route:   {}", result.route);
    if let Some(hash) = &result.transaction_hash {
        println!("  Tx hash: {}", hash);
    }
    if let Some(error) = &result.error {
        println!("  Error:   {}", error);
    }
    println!("  Message: {}", result.message);
}
