//! Configuration loading and validation

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::policy::{OperationKind, PolicyStore, RulePatch, TimeWindow};
use crate::policy::{DEFAULT_DAILY_LIMIT, DEFAULT_WALLET_LABEL};
use crate::wallet::address::is_valid_address;
use crate::wallet::{LedgerCommit, OrchestratorSettings};

/// Default config file looked up next to the binary's working directory
pub const DEFAULT_CONFIG_PATH: &str = "wallet-router.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Authorization policy settings
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Automatic-execution limit per wallet label per day (native units)
    #[serde(default = "default_daily_limit")]
    pub daily_limit: Decimal,

    /// Ledger label used when an operation names no wallet
    #[serde(default = "default_label")]
    pub default_label: String,

    /// When agent spend is charged against the daily limit
    #[serde(default)]
    pub ledger_commit: LedgerCommit,

    #[serde(default)]
    pub trusted_addresses: Vec<String>,

    #[serde(default)]
    pub blacklisted_addresses: Vec<String>,

    /// Overrides merged into the built-in rule table
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            default_label: default_label(),
            ledger_commit: LedgerCommit::default(),
            trusted_addresses: vec![],
            blacklisted_addresses: vec![],
            rules: vec![],
        }
    }
}

/// Rule override for one operation kind
///
/// ```toml
/// [[policy.rules]]
/// kind = "swap"
/// max_amount_per_tx = 0.2
/// require_confirmation = false
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub kind: OperationKind,
    pub max_amount_per_tx: Option<Decimal>,
    pub require_confirmation: Option<bool>,
    pub allowed_networks: Option<Vec<String>>,
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub clear_time_window: bool,
}

impl RuleConfig {
    pub fn to_patch(&self) -> RulePatch {
        RulePatch {
            max_amount_per_tx: self.max_amount_per_tx,
            require_confirmation: self.require_confirmation,
            allowed_networks: self.allowed_networks.clone(),
            time_window: self.time_window.clone(),
            clear_time_window: self.clear_time_window,
        }
    }
}

/// Wallet and execution settings
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Network used when a command names none
    #[serde(default = "default_network")]
    pub default_network: String,

    /// Token used when a command names none
    #[serde(default = "default_token")]
    pub default_token: String,

    /// Operation history entries kept in memory
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Environment variable holding the agent private key
    #[serde(default = "default_agent_key_env")]
    pub agent_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_network: default_network(),
            default_token: default_token(),
            history_limit: default_history_limit(),
            agent_key_env: default_agent_key_env(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

// Default value functions
fn default_daily_limit() -> Decimal {
    DEFAULT_DAILY_LIMIT
}

fn default_label() -> String {
    DEFAULT_WALLET_LABEL.to_string()
}

fn default_network() -> String {
    "base_sepolia".to_string()
}

fn default_token() -> String {
    "ETH".to_string()
}

fn default_history_limit() -> usize {
    1000
}

fn default_agent_key_env() -> String {
    "AGENT_PRIVATE_KEY".to_string()
}

fn default_log_filter() -> String {
    "wallet_router=info".to_string()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("policy.daily_limit", default_daily_limit().to_string())?
            .set_default("policy.default_label", default_label())?
            .set_default("wallet.default_network", default_network())?
            .set_default("wallet.default_token", default_token())?
            .set_default("logging.filter", default_log_filter())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WALLET_ROUTER__)
            .add_source(
                config::Environment::with_prefix("WALLET_ROUTER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("policy.trusted_addresses")
                    .with_list_parse_key("policy.blacklisted_addresses"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.policy.daily_limit <= Decimal::ZERO {
            anyhow::bail!("daily_limit must be positive");
        }

        if self.policy.default_label.trim().is_empty() {
            anyhow::bail!("default_label cannot be empty");
        }

        if self.wallet.default_network.trim().is_empty() {
            anyhow::bail!("default_network cannot be empty");
        }

        if self.wallet.default_token.trim().is_empty() {
            anyhow::bail!("default_token cannot be empty");
        }

        if self.wallet.history_limit == 0 {
            anyhow::bail!("history_limit must be at least 1");
        }

        // Validate address lists
        for address in self
            .policy
            .trusted_addresses
            .iter()
            .chain(&self.policy.blacklisted_addresses)
        {
            if !is_valid_address(address) {
                anyhow::bail!("Invalid address in policy lists: {}", address);
            }
        }

        // Rule overrides must produce valid rules
        self.build_store()
            .context("Invalid rule override in [policy.rules]")?;

        Ok(())
    }

    /// Policy store with the built-in rules, this config's overrides and
    /// address lists
    pub fn build_store(&self) -> crate::Result<PolicyStore> {
        let mut store = PolicyStore::new()
            .with_daily_limit(self.policy.daily_limit)
            .with_default_label(self.policy.default_label.clone());

        for rule in &self.policy.rules {
            store.update_rule(rule.kind, &rule.to_patch())?;
        }

        for address in &self.policy.trusted_addresses {
            store.add_trusted_address(address);
        }

        for address in &self.policy.blacklisted_addresses {
            store.add_blacklisted_address(address);
        }

        Ok(store)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            ledger_commit: self.policy.ledger_commit,
            history_limit: self.wallet.history_limit,
        }
    }

    /// Agent private key from the configured environment variable
    pub fn agent_private_key(&self) -> Option<String> {
        std::env::var(&self.wallet.agent_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let rule_kinds: Vec<String> = self
            .policy
            .rules
            .iter()
            .map(|r| r.kind.to_string())
            .collect();

        format!(
            r#"Configuration:
  Policy:
    daily_limit: {}
    default_label: {}
    ledger_commit: {:?}
    trusted_addresses: {}
    blacklisted_addresses: {}
    rule_overrides: {:?}
  Wallet:
    default_network: {}
    default_token: {}
    history_limit: {}
    agent_key ({}): {}
  Logging:
    filter: {}
    json: {}
"#,
            self.policy.daily_limit,
            self.policy.default_label,
            self.policy.ledger_commit,
            self.policy.trusted_addresses.len(),
            self.policy.blacklisted_addresses.len(),
            rule_kinds,
            self.wallet.default_network,
            self.wallet.default_token,
            self.wallet.history_limit,
            self.wallet.agent_key_env,
            if self.agent_private_key().is_some() {
                "***"
            } else {
                "(not set)"
            },
            self.logging.filter,
            self.logging.json,
        )
    }
}
