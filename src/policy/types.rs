//! Core policy types
//!
//! Defines operation kinds, per-kind rules, the evaluation context and the
//! decision returned by the evaluator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Network every rule allows when nothing else is specified
pub const DEFAULT_NETWORK: &str = "base_sepolia";

/// Per-transaction cap for rules created without an explicit one
pub const DEFAULT_MAX_AMOUNT: Decimal = dec!(0.1);

/// Kind of value-transfer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Plain token transfer
    Transfer,

    /// DeFi protocol interaction
    Defi,

    /// Arbitrary contract call
    ContractCall,

    /// NFT mint/transfer
    Nft,

    /// Token swap
    Swap,
}

impl OperationKind {
    /// All operation kinds, in rule-table order
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Transfer,
        OperationKind::Defi,
        OperationKind::ContractCall,
        OperationKind::Nft,
        OperationKind::Swap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Transfer => "transfer",
            OperationKind::Defi => "defi",
            OperationKind::ContractCall => "contract_call",
            OperationKind::Nft => "nft",
            OperationKind::Swap => "swap",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "transfer" => Ok(OperationKind::Transfer),
            "defi" => Ok(OperationKind::Defi),
            "contract_call" => Ok(OperationKind::ContractCall),
            "nft" => Ok(OperationKind::Nft),
            "swap" => Ok(OperationKind::Swap),
            _ => Err(Error::UnknownOperationKind(s.to_string())),
        }
    }
}

/// Hours of the day during which automatic execution is allowed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// First allowed hour (0-23, inclusive)
    pub start_hour: u32,

    /// Last allowed hour (0-23, inclusive)
    pub end_hour: u32,

    /// IANA zone ("Asia/Shanghai"), fixed offset ("+08:00", "-0530") or "UTC"
    pub timezone: String,
}

impl TimeWindow {
    pub fn new(start_hour: u32, end_hour: u32, timezone: impl Into<String>) -> Self {
        Self {
            start_hour,
            end_hour,
            timezone: timezone.into(),
        }
    }

    /// Parsed timezone of this window
    pub fn zone(&self) -> Result<WindowZone> {
        parse_timezone(&self.timezone)
            .ok_or_else(|| Error::InvalidRule(format!("unrecognized timezone: {}", self.timezone)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(Error::InvalidRule(format!(
                "time window hours must be within 0-23, got {}-{}",
                self.start_hour, self.end_hour
            )));
        }
        self.zone().map(|_| ())
    }

    /// Hour of `at` in this window's timezone
    pub fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        // Windows are validated on insertion; UTC is only reached for hand-built rules.
        match self.zone().unwrap_or(WindowZone::Fixed(Utc.fix())) {
            WindowZone::Fixed(offset) => at.with_timezone(&offset).hour(),
            WindowZone::Named(tz) => at.with_timezone(&tz).hour(),
        }
    }

    /// Whether `at` falls inside the window (both ends inclusive)
    ///
    /// A window whose start is after its end wraps past midnight.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = self.local_hour(at);
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour <= self.end_hour
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:00-{:02}:59 ({})",
            self.start_hour, self.end_hour, self.timezone
        )
    }
}

/// Timezone a [`TimeWindow`] is evaluated in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowZone {
    Fixed(FixedOffset),
    Named(Tz),
}

/// Parse "UTC"/"Z", a fixed offset ("+08:00", "-0530") or an IANA zone name
pub fn parse_timezone(tz: &str) -> Option<WindowZone> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).map(WindowZone::Fixed);
    }

    if tz.starts_with(['+', '-']) {
        // chrono ignores trailing input after the offset
        if !matches!(tz.len(), 5 | 6) {
            return None;
        }
        return tz.parse::<FixedOffset>().ok().map(WindowZone::Fixed);
    }

    tz.parse::<Tz>().ok().map(WindowZone::Named)
}

/// Policy for one operation kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Operation kind this rule governs
    pub kind: OperationKind,

    /// Largest amount (native units) that may execute automatically
    pub max_amount_per_tx: Decimal,

    /// Always route to the user wallet
    pub require_confirmation: bool,

    /// Networks this operation may run on
    pub allowed_networks: Vec<String>,

    /// Optional automatic-execution window
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
}

impl Rule {
    /// Rule used when a kind has no rule yet
    pub fn with_defaults(kind: OperationKind) -> Self {
        Self {
            kind,
            max_amount_per_tx: DEFAULT_MAX_AMOUNT,
            require_confirmation: false,
            allowed_networks: vec![DEFAULT_NETWORK.to_string()],
            time_window: None,
        }
    }

    pub fn allows_network(&self, network: &str) -> bool {
        self.allowed_networks.iter().any(|n| n == network)
    }

    /// Merge a partial update into this rule
    pub fn apply(&self, patch: &RulePatch) -> Rule {
        let time_window = match (&patch.time_window, patch.clear_time_window) {
            (Some(window), _) => Some(window.clone()),
            (None, true) => None,
            (None, false) => self.time_window.clone(),
        };

        Rule {
            kind: self.kind,
            max_amount_per_tx: patch.max_amount_per_tx.unwrap_or(self.max_amount_per_tx),
            require_confirmation: patch
                .require_confirmation
                .unwrap_or(self.require_confirmation),
            allowed_networks: patch
                .allowed_networks
                .clone()
                .unwrap_or_else(|| self.allowed_networks.clone()),
            time_window,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_amount_per_tx < Decimal::ZERO {
            return Err(Error::InvalidRule(format!(
                "{}: max_amount_per_tx must be non-negative, got {}",
                self.kind, self.max_amount_per_tx
            )));
        }

        if let Some(window) = &self.time_window {
            window.validate()?;
        }

        Ok(())
    }
}

/// Built-in rule table
///
/// Transfers may run automatically up to 0.1 between 08:00 and 22:59
/// Shanghai time; every other kind always needs the user's confirmation.
pub fn default_rules() -> Vec<Rule> {
    let testnets = vec!["base_sepolia".to_string(), "ethereum_sepolia".to_string()];

    vec![
        Rule {
            kind: OperationKind::Transfer,
            max_amount_per_tx: dec!(0.1),
            require_confirmation: false,
            allowed_networks: testnets.clone(),
            time_window: Some(TimeWindow::new(8, 22, "Asia/Shanghai")),
        },
        Rule {
            kind: OperationKind::Defi,
            max_amount_per_tx: dec!(0.05),
            require_confirmation: true,
            allowed_networks: testnets.clone(),
            time_window: None,
        },
        Rule {
            kind: OperationKind::ContractCall,
            max_amount_per_tx: dec!(0.01),
            require_confirmation: true,
            allowed_networks: testnets.clone(),
            time_window: None,
        },
        Rule {
            kind: OperationKind::Nft,
            max_amount_per_tx: dec!(0.1),
            require_confirmation: true,
            allowed_networks: testnets.clone(),
            time_window: None,
        },
        Rule {
            kind: OperationKind::Swap,
            max_amount_per_tx: dec!(0.05),
            require_confirmation: true,
            allowed_networks: testnets,
            time_window: None,
        },
    ]
}

/// Partial rule update; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePatch {
    pub max_amount_per_tx: Option<Decimal>,
    pub require_confirmation: Option<bool>,
    pub allowed_networks: Option<Vec<String>>,
    pub time_window: Option<TimeWindow>,

    /// Drop the existing time window (ignored when `time_window` is set)
    pub clear_time_window: bool,
}

impl RulePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_amount(mut self, amount: Decimal) -> Self {
        self.max_amount_per_tx = Some(amount);
        self
    }

    pub fn require_confirmation(mut self, required: bool) -> Self {
        self.require_confirmation = Some(required);
        self
    }

    pub fn networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_networks = Some(networks.into_iter().map(Into::into).collect());
        self
    }

    pub fn time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self.clear_time_window = false;
        self
    }

    pub fn without_time_window(mut self) -> Self {
        self.time_window = None;
        self.clear_time_window = true;
        self
    }
}

/// Everything the evaluator needs to know about one requested operation
///
/// Built fresh for every call and never stored.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub kind: OperationKind,

    /// Amount as supplied by the caller (decimal string)
    pub amount: String,

    pub token_symbol: String,
    pub to_address: String,
    pub network: String,

    /// Agent wallet label charged against the daily limit
    pub from_wallet_label: Option<String>,

    pub is_trusted_address: bool,
    pub is_new_address: bool,
    pub evaluation_time: DateTime<Utc>,
}

/// Which signer (if any) handles an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletRoute {
    /// Signed autonomously with a system-held key
    Agent,

    /// Sent to a human-controlled signer for approval
    User,

    /// Not executed at all
    Rejected,
}

impl fmt::Display for WalletRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletRoute::Agent => write!(f, "agent"),
            WalletRoute::User => write!(f, "user"),
            WalletRoute::Rejected => write!(f, "rejected"),
        }
    }
}

/// Why the evaluator reached its decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DecisionReason {
    /// Recipient is on the blacklist
    Blacklisted { address: String },

    /// No rule for the kind, or network not in the rule's allowed set
    NetworkNotSupported { kind: OperationKind, network: String },

    /// Evaluation time is outside the rule's window
    OutsideTimeWindow { hour: u32, window: TimeWindow },

    /// Amount could not be read as a non-negative decimal
    InvalidAmount { amount: String },

    /// Amount is above the rule's per-transaction cap
    AmountExceedsCap { amount: Decimal, cap: Decimal },

    /// Amount would push the label past its daily limit
    DailyLimitReached {
        used: Decimal,
        requested: Decimal,
        limit: Decimal,
    },

    /// Rule demands confirmation for every operation of this kind
    ConfirmationRequired { kind: OperationKind },

    /// Recipient has not been trusted yet
    NewAddress { address: String },

    /// All checks passed
    Approved,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::Blacklisted { address } => {
                write!(f, "target address blacklisted: {}", address)
            }
            DecisionReason::NetworkNotSupported { kind, network } => {
                write!(
                    f,
                    "network {} not supported for this operation ({})",
                    network, kind
                )
            }
            DecisionReason::OutsideTimeWindow { hour, window } => {
                write!(
                    f,
                    "outside automatic-execution window: hour {} not in {}",
                    hour, window
                )
            }
            DecisionReason::InvalidAmount { amount } => {
                write!(f, "invalid amount: {:?}", amount)
            }
            DecisionReason::AmountExceedsCap { amount, cap } => {
                write!(f, "amount exceeds automatic cap: {} > {}", amount, cap)
            }
            DecisionReason::DailyLimitReached {
                used,
                requested,
                limit,
            } => {
                write!(
                    f,
                    "daily automatic-execution limit reached: {} used + {} requested > {} limit",
                    used, requested, limit
                )
            }
            DecisionReason::ConfirmationRequired { kind } => {
                write!(f, "operation type requires confirmation: {}", kind)
            }
            DecisionReason::NewAddress { address } => {
                write!(f, "new address requires confirmation: {}", address)
            }
            DecisionReason::Approved => write!(f, "meets automatic-execution criteria"),
        }
    }
}

/// Terminal outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub route: WalletRoute,
    pub reason: DecisionReason,
    pub requires_confirmation: bool,
}

impl Decision {
    pub fn agent() -> Self {
        Self {
            route: WalletRoute::Agent,
            reason: DecisionReason::Approved,
            requires_confirmation: false,
        }
    }

    pub fn user(reason: DecisionReason) -> Self {
        Self {
            route: WalletRoute::User,
            reason,
            requires_confirmation: true,
        }
    }

    pub fn rejected(reason: DecisionReason) -> Self {
        Self {
            route: WalletRoute::Rejected,
            reason,
            requires_confirmation: false,
        }
    }

    /// Human-readable reason
    pub fn message(&self) -> String {
        self.reason.to_string()
    }
}

/// Parse a decimal amount string into native units
///
/// Returns `None` for anything that is not a plain non-negative decimal.
pub fn parse_amount(amount: &str) -> Option<Decimal> {
    let value = Decimal::from_str_exact(amount.trim()).ok()?;
    if value < Decimal::ZERO {
        return None;
    }
    Some(value.normalize())
}
