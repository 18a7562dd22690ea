//! Authorization policy
//!
//! Decides, for each requested value transfer, whether it may be signed by
//! an agent wallet, must be confirmed by the user, or is rejected.
//!
//! # Architecture
//!
//! ```text
//! OperationContext ──► PermissionEvaluator ──► Decision
//!                             ↑
//!                        PolicyStore
//!               (rules, address lists, DailyLedger)
//! ```

pub mod evaluator;
pub mod ledger;
pub mod store;
pub mod types;

pub use evaluator::PermissionEvaluator;
pub use ledger::{DailyLedger, DailyUsage, DailyUsageReport, Reservation};
pub use store::{normalize_address, PolicyStore, DEFAULT_DAILY_LIMIT, DEFAULT_WALLET_LABEL};
pub use types::{
    default_rules, Decision, DecisionReason, OperationContext, OperationKind, Rule, RulePatch,
    TimeWindow, WalletRoute, WindowZone,
};
