//! Policy store
//!
//! Holds the rule table, the trusted and blacklisted address sets and the
//! daily ledger. Constructed once per process and passed by reference to the
//! evaluator.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::error::Result;

use super::ledger::{DailyLedger, DailyUsageReport};
use super::types::{default_rules, OperationKind, Rule, RulePatch};

/// Daily automatic-execution limit per wallet label (native units)
pub const DEFAULT_DAILY_LIMIT: Decimal = dec!(1);

/// Ledger label used when the caller names no wallet
pub const DEFAULT_WALLET_LABEL: &str = "default";

/// Lowercase and trim an address for set membership
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Rules, address lists and the daily ledger
#[derive(Debug)]
pub struct PolicyStore {
    rules: BTreeMap<OperationKind, Rule>,
    trusted: HashSet<String>,
    blacklisted: HashSet<String>,
    ledger: Arc<DailyLedger>,
    daily_limit: Decimal,
    default_label: String,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    /// Store with the built-in rule table
    pub fn new() -> Self {
        let mut store = Self::empty();
        for rule in default_rules() {
            store.rules.insert(rule.kind, rule);
        }
        store
    }

    /// Store without any rules
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
            trusted: HashSet::new(),
            blacklisted: HashSet::new(),
            ledger: Arc::new(DailyLedger::new()),
            daily_limit: DEFAULT_DAILY_LIMIT,
            default_label: DEFAULT_WALLET_LABEL.to_string(),
        }
    }

    pub fn with_daily_limit(mut self, limit: Decimal) -> Self {
        self.daily_limit = limit;
        self
    }

    pub fn with_default_label(mut self, label: impl Into<String>) -> Self {
        self.default_label = label.into();
        self
    }

    pub fn rule(&self, kind: OperationKind) -> Option<&Rule> {
        self.rules.get(&kind)
    }

    /// All rules, ordered by operation kind
    pub fn rules(&self) -> Vec<Rule> {
        self.rules.values().cloned().collect()
    }

    /// Merge `patch` into the rule for `kind`
    ///
    /// A kind without a rule gets one built from [`Rule::with_defaults`].
    /// The merged rule is validated before it replaces the old one.
    pub fn update_rule(&mut self, kind: OperationKind, patch: &RulePatch) -> Result<Rule> {
        let base = self
            .rules
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Rule::with_defaults(kind));

        let rule = base.apply(patch);
        rule.validate()?;

        info!(
            kind = %kind,
            max_amount = %rule.max_amount_per_tx,
            require_confirmation = rule.require_confirmation,
            networks = ?rule.allowed_networks,
            "Updated rule"
        );

        self.rules.insert(kind, rule.clone());
        Ok(rule)
    }

    /// Remove the rule for `kind`; operations of that kind are then rejected
    pub fn remove_rule(&mut self, kind: OperationKind) -> Option<Rule> {
        let removed = self.rules.remove(&kind);
        if removed.is_some() {
            info!(kind = %kind, "Removed rule");
        }
        removed
    }

    pub fn add_trusted_address(&mut self, address: &str) {
        self.trusted.insert(normalize_address(address));
    }

    pub fn remove_trusted_address(&mut self, address: &str) -> bool {
        self.trusted.remove(&normalize_address(address))
    }

    pub fn is_trusted_address(&self, address: &str) -> bool {
        self.trusted.contains(&normalize_address(address))
    }

    /// Trusted addresses, sorted
    pub fn trusted_addresses(&self) -> Vec<String> {
        let mut list: Vec<String> = self.trusted.iter().cloned().collect();
        list.sort();
        list
    }

    pub fn add_blacklisted_address(&mut self, address: &str) {
        self.blacklisted.insert(normalize_address(address));
    }

    pub fn remove_blacklisted_address(&mut self, address: &str) -> bool {
        self.blacklisted.remove(&normalize_address(address))
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklisted.contains(&normalize_address(address))
    }

    /// Blacklisted addresses, sorted
    pub fn blacklisted_addresses(&self) -> Vec<String> {
        let mut list: Vec<String> = self.blacklisted.iter().cloned().collect();
        list.sort();
        list
    }

    pub fn ledger(&self) -> &Arc<DailyLedger> {
        &self.ledger
    }

    pub fn daily_limit(&self) -> Decimal {
        self.daily_limit
    }

    pub fn default_label(&self) -> &str {
        &self.default_label
    }

    /// Ledger label for an optional caller-supplied wallet label
    pub fn label_or_default<'a>(&'a self, label: Option<&'a str>) -> &'a str {
        match label {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.default_label,
        }
    }

    /// Used/limit/remaining for `label` on `today`
    pub fn daily_usage(&self, label: &str, today: NaiveDate) -> DailyUsageReport {
        self.ledger.report(label, self.daily_limit, today)
    }

    /// Clear the ledger for every label
    pub fn reset_daily_limits(&self) {
        self.ledger.reset();
        info!("Daily limits reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::TimeWindow;

    #[test]
    fn test_default_rule_table() {
        let store = PolicyStore::new();
        let rules = store.rules();
        assert_eq!(rules.len(), 5);

        let transfer = store.rule(OperationKind::Transfer).unwrap();
        assert_eq!(transfer.max_amount_per_tx, dec!(0.1));
        assert!(!transfer.require_confirmation);
        assert!(transfer.allows_network("base_sepolia"));
        assert!(transfer.allows_network("ethereum_sepolia"));
        assert!(transfer.time_window.is_some());

        for kind in [
            OperationKind::Defi,
            OperationKind::ContractCall,
            OperationKind::Nft,
            OperationKind::Swap,
        ] {
            assert!(store.rule(kind).unwrap().require_confirmation);
        }
    }

    #[test]
    fn test_update_rule_replaces_existing() {
        let mut store = PolicyStore::new();
        let updated = store
            .update_rule(OperationKind::Swap, &RulePatch::new().max_amount(dec!(0.3)))
            .unwrap();

        assert_eq!(updated.max_amount_per_tx, dec!(0.3));
        assert!(updated.require_confirmation);
        assert_eq!(store.rules().len(), 5);
        assert_eq!(
            store.rule(OperationKind::Swap).unwrap().max_amount_per_tx,
            dec!(0.3)
        );
    }

    #[test]
    fn test_update_rule_creates_from_defaults() {
        let mut store = PolicyStore::empty();
        let rule = store
            .update_rule(OperationKind::Nft, &RulePatch::new().require_confirmation(true))
            .unwrap();

        assert_eq!(rule.max_amount_per_tx, dec!(0.1));
        assert!(rule.require_confirmation);
        assert_eq!(rule.allowed_networks, vec!["base_sepolia".to_string()]);
        assert!(rule.time_window.is_none());
    }

    #[test]
    fn test_update_rule_rejects_invalid() {
        let mut store = PolicyStore::new();
        let result = store.update_rule(
            OperationKind::Transfer,
            &RulePatch::new().time_window(TimeWindow::new(8, 30, "UTC")),
        );
        assert!(result.is_err());

        // Old rule untouched
        let window = store
            .rule(OperationKind::Transfer)
            .unwrap()
            .time_window
            .clone()
            .unwrap();
        assert_eq!(window.end_hour, 22);
    }

    #[test]
    fn test_update_rule_rejects_malformed_timezone() {
        let mut store = PolicyStore::new();
        for tz in ["+0é0", "+-05", "+05:-30", "Mars/Base"] {
            let result = store.update_rule(
                OperationKind::Transfer,
                &RulePatch::new().time_window(TimeWindow::new(8, 22, tz)),
            );
            assert!(
                matches!(result, Err(crate::Error::InvalidRule(_))),
                "timezone {:?}",
                tz
            );
        }

        let rule = store
            .update_rule(
                OperationKind::Transfer,
                &RulePatch::new().time_window(TimeWindow::new(9, 17, "America/New_York")),
            )
            .unwrap();
        assert_eq!(rule.time_window.unwrap().timezone, "America/New_York");
    }

    #[test]
    fn test_address_lists_case_insensitive() {
        let mut store = PolicyStore::new();
        store.add_trusted_address("0xAbCdEf0000000000000000000000000000000001");

        assert!(store.is_trusted_address("0xabcdef0000000000000000000000000000000001"));
        assert!(store.is_trusted_address("0XABCDEF0000000000000000000000000000000001"));

        assert!(store.remove_trusted_address("0xABCDEF0000000000000000000000000000000001"));
        assert!(!store.is_trusted_address("0xabcdef0000000000000000000000000000000001"));

        store.add_blacklisted_address("0xBAD0000000000000000000000000000000000001");
        assert!(store.is_blacklisted("0xbad0000000000000000000000000000000000001"));
        assert_eq!(
            store.blacklisted_addresses(),
            vec!["0xbad0000000000000000000000000000000000001".to_string()]
        );
    }

    #[test]
    fn test_label_or_default() {
        let store = PolicyStore::new();
        assert_eq!(store.label_or_default(None), "default");
        assert_eq!(store.label_or_default(Some("  ")), "default");
        assert_eq!(store.label_or_default(Some("agent_1")), "agent_1");
    }

    #[test]
    fn test_daily_usage_fresh_label() {
        let store = PolicyStore::new();
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let report = store.daily_usage("unused", today);

        assert_eq!(report.used, Decimal::ZERO);
        assert_eq!(report.limit, dec!(1));
        assert_eq!(report.remaining, dec!(1));
    }
}
