//! Permission evaluator - decides which wallet handles an operation
//!
//! # Evaluation order
//!
//! Checks run in a fixed order and the first one that fires decides:
//!
//! 1. **Blacklist** - recipient blacklisted: REJECT
//! 2. **Rule / network** - no rule, or network not allowed: REJECT
//! 3. **Time window** - outside the rule's window: USER
//! 4. **Per-transaction cap** - amount above the cap: USER (unparsable amount: REJECT)
//! 5. **Daily cap** - label's spend today plus amount above the limit: USER
//! 6. **Mandatory confirmation** - rule requires confirmation: USER
//! 7. **New address** - recipient new and not trusted: USER
//! 8. **Allow** - AGENT
//!
//! Evaluation never mutates the store. Charging the daily ledger is left to
//! the caller (see [`crate::policy::ledger`]).

use rust_decimal::Decimal;
use tracing::debug;

use super::store::PolicyStore;
use super::types::{parse_amount, Decision, DecisionReason, OperationContext};

/// Stateless evaluator over a [`PolicyStore`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    /// Evaluate `ctx` against `store`
    pub fn evaluate(ctx: &OperationContext, store: &PolicyStore) -> Decision {
        let decision = Self::decide(ctx, store);
        debug!(
            kind = %ctx.kind,
            to = %ctx.to_address,
            amount = %ctx.amount,
            network = %ctx.network,
            route = %decision.route,
            reason = %decision.reason,
            "Evaluated operation"
        );
        decision
    }

    fn decide(ctx: &OperationContext, store: &PolicyStore) -> Decision {
        // 1. Blacklist
        if store.is_blacklisted(&ctx.to_address) {
            return Decision::rejected(DecisionReason::Blacklisted {
                address: ctx.to_address.clone(),
            });
        }

        // 2. Rule and network
        let rule = match store.rule(ctx.kind) {
            Some(rule) if rule.allows_network(&ctx.network) => rule,
            _ => {
                return Decision::rejected(DecisionReason::NetworkNotSupported {
                    kind: ctx.kind,
                    network: ctx.network.clone(),
                })
            }
        };

        // 3. Time window
        if let Some(window) = &rule.time_window {
            if !window.contains(ctx.evaluation_time) {
                return Decision::user(DecisionReason::OutsideTimeWindow {
                    hour: window.local_hour(ctx.evaluation_time),
                    window: window.clone(),
                });
            }
        }

        // 4. Per-transaction cap
        let Some(amount) = to_native_units(&ctx.amount, &ctx.token_symbol) else {
            return Decision::rejected(DecisionReason::InvalidAmount {
                amount: ctx.amount.clone(),
            });
        };
        if amount > rule.max_amount_per_tx {
            return Decision::user(DecisionReason::AmountExceedsCap {
                amount,
                cap: rule.max_amount_per_tx,
            });
        }

        // 5. Daily cap
        let label = store.label_or_default(ctx.from_wallet_label.as_deref());
        let today = ctx.evaluation_time.date_naive();
        let used = store.ledger().usage(label, today);
        if used + amount > store.daily_limit() {
            return Decision::user(DecisionReason::DailyLimitReached {
                used: used.normalize(),
                requested: amount,
                limit: store.daily_limit(),
            });
        }

        // 6. Mandatory confirmation
        if rule.require_confirmation {
            return Decision::user(DecisionReason::ConfirmationRequired { kind: ctx.kind });
        }

        // 7. New, untrusted recipient
        if ctx.is_new_address && !ctx.is_trusted_address {
            return Decision::user(DecisionReason::NewAddress {
                address: ctx.to_address.clone(),
            });
        }

        // 8. Allow
        Decision::agent()
    }
}

/// Convert a token amount into the unit the caps are written in
///
/// Every token is taken at face value: no decimals or exchange rate are
/// applied, so 0.05 of any token compares equal to 0.05 of the native coin.
pub fn to_native_units(amount: &str, _token_symbol: &str) -> Option<Decimal> {
    parse_amount(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::store::PolicyStore;
    use crate::policy::types::{OperationKind, RulePatch, WalletRoute};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    const TRUSTED: &str = "0x1111111111111111111111111111111111111111";
    const STRANGER: &str = "0x2222222222222222222222222222222222222222";

    /// `hour` o'clock in Shanghai (the default transfer window's zone)
    fn local(hour: u32) -> DateTime<Utc> {
        let utc_hour = (hour + 24 - 8) % 24;
        let day = if hour < 8 { 1 } else { 2 };
        Utc.with_ymd_and_hms(2025, 3, day, utc_hour, 0, 0).unwrap()
    }

    fn store() -> PolicyStore {
        let mut store = PolicyStore::new();
        store.add_trusted_address(TRUSTED);
        store
    }

    fn context(kind: OperationKind, to: &str, amount: &str, at: DateTime<Utc>) -> OperationContext {
        OperationContext {
            kind,
            amount: amount.to_string(),
            token_symbol: "ETH".to_string(),
            to_address: to.to_string(),
            network: "base_sepolia".to_string(),
            from_wallet_label: Some("agent_wallet".to_string()),
            is_trusted_address: to == TRUSTED,
            is_new_address: to != TRUSTED,
            evaluation_time: at,
        }
    }

    fn transfer(amount: &str, hour: u32) -> OperationContext {
        context(OperationKind::Transfer, TRUSTED, amount, local(hour))
    }

    #[test]
    fn test_small_trusted_transfer_goes_to_agent() {
        let decision = PermissionEvaluator::evaluate(&transfer("0.05", 12), &store());
        assert_eq!(decision.route, WalletRoute::Agent);
        assert_eq!(decision.reason, DecisionReason::Approved);
        assert!(!decision.requires_confirmation);
    }

    #[test]
    fn test_blacklist_wins_over_everything() {
        let mut store = store();
        store.add_blacklisted_address(&TRUSTED.to_uppercase().replace("0X", "0x"));

        for kind in OperationKind::ALL {
            for (amount, hour) in [("0.01", 12), ("5", 23), ("bogus", 3)] {
                let mut ctx = context(kind, TRUSTED, amount, local(hour));
                ctx.network = "mainnet".to_string();
                let decision = PermissionEvaluator::evaluate(&ctx, &store);
                assert_eq!(decision.route, WalletRoute::Rejected);
                assert!(matches!(decision.reason, DecisionReason::Blacklisted { .. }));
                assert!(!decision.requires_confirmation);
            }
        }
    }

    #[test]
    fn test_unsupported_network_rejected() {
        let store = store();
        for kind in OperationKind::ALL {
            let mut ctx = context(kind, TRUSTED, "0.01", local(12));
            ctx.network = "ethereum_mainnet".to_string();

            let decision = PermissionEvaluator::evaluate(&ctx, &store);
            assert_eq!(decision.route, WalletRoute::Rejected);
            assert!(matches!(
                decision.reason,
                DecisionReason::NetworkNotSupported { .. }
            ));
        }
    }

    #[test]
    fn test_missing_rule_rejected() {
        let mut store = store();
        store.remove_rule(OperationKind::Transfer);

        let decision = PermissionEvaluator::evaluate(&transfer("0.05", 12), &store);
        assert_eq!(decision.route, WalletRoute::Rejected);
    }

    #[test]
    fn test_outside_window_goes_to_user() {
        let decision = PermissionEvaluator::evaluate(&transfer("0.05", 23), &store());
        assert_eq!(decision.route, WalletRoute::User);
        assert!(decision.requires_confirmation);
        assert!(matches!(
            decision.reason,
            DecisionReason::OutsideTimeWindow { hour: 23, .. }
        ));
        assert!(decision.message().contains("window"));
    }

    #[test]
    fn test_window_edges_inclusive() {
        let store = store();
        assert_eq!(
            PermissionEvaluator::evaluate(&transfer("0.05", 8), &store).route,
            WalletRoute::Agent
        );
        assert_eq!(
            PermissionEvaluator::evaluate(&transfer("0.05", 22), &store).route,
            WalletRoute::Agent
        );
        assert_eq!(
            PermissionEvaluator::evaluate(&transfer("0.05", 7), &store).route,
            WalletRoute::User
        );
    }

    #[test]
    fn test_amount_over_cap_goes_to_user() {
        let decision = PermissionEvaluator::evaluate(&transfer("0.2", 12), &store());
        assert_eq!(decision.route, WalletRoute::User);
        assert_eq!(
            decision.reason,
            DecisionReason::AmountExceedsCap {
                amount: dec!(0.2),
                cap: dec!(0.1)
            }
        );
    }

    #[test]
    fn test_amount_equal_to_cap_allowed() {
        let decision = PermissionEvaluator::evaluate(&transfer("0.1", 12), &store());
        assert_eq!(decision.route, WalletRoute::Agent);
    }

    #[test]
    fn test_invalid_amount_rejected() {
        for amount in ["", "abc", "-0.1", "inf"] {
            let decision = PermissionEvaluator::evaluate(&transfer(amount, 12), &store());
            assert_eq!(decision.route, WalletRoute::Rejected, "amount {:?}", amount);
            assert!(matches!(decision.reason, DecisionReason::InvalidAmount { .. }));
        }
    }

    #[test]
    fn test_non_native_token_compared_at_face_value() {
        // 0.05 USDC is compared as if it were 0.05 ETH
        let mut ctx = transfer("0.05", 12);
        ctx.token_symbol = "USDC".to_string();
        assert_eq!(
            PermissionEvaluator::evaluate(&ctx, &store()).route,
            WalletRoute::Agent
        );

        // 50 USDC exceeds the 0.1 cap even though it is worth little
        ctx.amount = "50".to_string();
        assert_eq!(
            PermissionEvaluator::evaluate(&ctx, &store()).route,
            WalletRoute::User
        );
    }

    #[test]
    fn test_daily_limit_goes_to_user_without_charging() {
        let mut store = store();
        store
            .update_rule(OperationKind::Transfer, &RulePatch::new().max_amount(dec!(0.5)))
            .unwrap();

        let ctx = transfer("0.25", 12);
        let today = ctx.evaluation_time.date_naive();

        for _ in 0..4 {
            let decision = PermissionEvaluator::evaluate(&ctx, &store);
            assert_eq!(decision.route, WalletRoute::Agent);
            store
                .ledger()
                .try_reserve("agent_wallet", dec!(0.25), store.daily_limit(), today)
                .unwrap()
                .commit();
        }
        assert_eq!(store.ledger().usage("agent_wallet", today), dec!(1));

        let decision = PermissionEvaluator::evaluate(&ctx, &store);
        assert_eq!(decision.route, WalletRoute::User);
        assert!(matches!(
            decision.reason,
            DecisionReason::DailyLimitReached { .. }
        ));
        assert_eq!(store.ledger().usage("agent_wallet", today), dec!(1));

        store.reset_daily_limits();
        assert_eq!(
            PermissionEvaluator::evaluate(&ctx, &store).route,
            WalletRoute::Agent
        );
    }

    #[test]
    fn test_evaluate_is_read_only() {
        let store = store();
        let ctx = transfer("0.05", 12);
        for _ in 0..50 {
            assert_eq!(
                PermissionEvaluator::evaluate(&ctx, &store).route,
                WalletRoute::Agent
            );
        }
        assert!(store.ledger().labels().is_empty());
    }

    #[test]
    fn test_missing_label_charges_default() {
        let store = store();
        let mut ctx = transfer("0.05", 12);
        ctx.from_wallet_label = None;
        let today = ctx.evaluation_time.date_naive();

        store
            .ledger()
            .try_reserve("default", dec!(0.98), store.daily_limit(), today)
            .unwrap()
            .commit();

        assert_eq!(
            PermissionEvaluator::evaluate(&ctx, &store).route,
            WalletRoute::User
        );
    }

    #[test]
    fn test_mandatory_confirmation() {
        let store = store();
        for kind in [
            OperationKind::Defi,
            OperationKind::ContractCall,
            OperationKind::Nft,
            OperationKind::Swap,
        ] {
            let ctx = context(kind, TRUSTED, "0.001", local(12));
            let decision = PermissionEvaluator::evaluate(&ctx, &store);
            assert_eq!(decision.route, WalletRoute::User);
            assert_eq!(
                decision.reason,
                DecisionReason::ConfirmationRequired { kind }
            );
        }
    }

    #[test]
    fn test_new_address_goes_to_user() {
        let ctx = context(OperationKind::Transfer, STRANGER, "0.05", local(12));
        let decision = PermissionEvaluator::evaluate(&ctx, &store());
        assert_eq!(decision.route, WalletRoute::User);
        assert!(matches!(decision.reason, DecisionReason::NewAddress { .. }));
    }

    #[test]
    fn test_rule_update_seen_immediately() {
        let mut store = store();
        store
            .update_rule(
                OperationKind::Swap,
                &RulePatch::new()
                    .require_confirmation(false)
                    .max_amount(dec!(0.05)),
            )
            .unwrap();

        let ctx = context(OperationKind::Swap, TRUSTED, "0.08", local(12));
        assert_eq!(
            PermissionEvaluator::evaluate(&ctx, &store).reason,
            DecisionReason::AmountExceedsCap {
                amount: dec!(0.08),
                cap: dec!(0.05)
            }
        );

        store
            .update_rule(OperationKind::Swap, &RulePatch::new().max_amount(dec!(0.1)))
            .unwrap();
        assert_eq!(
            PermissionEvaluator::evaluate(&ctx, &store).route,
            WalletRoute::Agent
        );
    }

    #[test]
    fn test_daily_limit_compares_exact_decimals() {
        let mut store = store();
        store
            .update_rule(OperationKind::Transfer, &RulePatch::new().max_amount(dec!(1)))
            .unwrap();
        let today = local(12).date_naive();

        for amount in [dec!(0.34), dec!(0.56)] {
            store
                .ledger()
                .try_reserve("agent_wallet", amount, store.daily_limit(), today)
                .unwrap()
                .commit();
        }

        let decision = PermissionEvaluator::evaluate(&transfer("0.1", 12), &store);
        assert_eq!(decision.route, WalletRoute::Agent);
        let decision = PermissionEvaluator::evaluate(&transfer("0.11", 12), &store);
        assert_eq!(
            decision.reason,
            DecisionReason::DailyLimitReached {
                used: dec!(0.9),
                requested: dec!(0.11),
                limit: dec!(1)
            }
        );
    }

    #[test]
    fn test_check_order_window_before_cap() {
        // Over cap and outside window: window reported first
        let decision = PermissionEvaluator::evaluate(&transfer("5", 23), &store());
        assert!(matches!(
            decision.reason,
            DecisionReason::OutsideTimeWindow { .. }
        ));
    }
}
