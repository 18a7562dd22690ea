//! Per-wallet daily spend ledger
//!
//! Tracks how much each agent wallet label has spent automatically on the
//! current calendar date (UTC). Entries from an earlier date are treated as
//! zero and replaced on the next write.
//!
//! Spending happens in two phases so that the daily cap holds under
//! concurrent callers:
//!
//! ```text
//! try_reserve ──► (submit) ──► Reservation::commit
//!                    └──────► Reservation::release / drop
//! ```
//!
//! Each label lives in its own [`DashMap`] entry, so the read-compare-write
//! in [`DailyLedger::try_reserve`] is atomic per label. A [`Reservation`]
//! that is dropped without being committed gives its amount back.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Daily spend for one wallet label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// Calendar date (UTC) this entry counts for
    pub date: NaiveDate,

    /// Spend confirmed by a successful execution
    pub committed: Decimal,

    /// Spend held for executions still in flight
    pub reserved: Decimal,

    /// Number of committed charges
    pub charge_count: u32,

    /// Time of the last committed charge
    pub last_charge: Option<DateTime<Utc>>,
}

impl DailyUsage {
    /// Empty usage for `date`
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            committed: Decimal::ZERO,
            reserved: Decimal::ZERO,
            charge_count: 0,
            last_charge: None,
        }
    }

    /// Committed plus reserved spend
    pub fn total(&self) -> Decimal {
        self.committed + self.reserved
    }

    /// Reset if the entry is not for `today`
    pub fn reset_if_stale(&mut self, today: NaiveDate) {
        if self.date != today {
            *self = Self::new(today);
        }
    }
}

/// Amount held against a label until the execution settles
///
/// Settled by [`Reservation::commit`] or [`Reservation::release`]. Dropping
/// an unsettled reservation (a cancelled execution, for instance) releases it.
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    ledger: Arc<DailyLedger>,
    label: String,
    amount: Decimal,
    date: NaiveDate,
    settled: bool,
}

impl Reservation {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Turn the reservation into committed spend
    ///
    /// A reservation from an earlier date is dropped: that day's ledger is
    /// no longer live.
    pub fn commit(mut self) {
        self.settled = true;
        let Some(mut entry) = self.ledger.entries.get_mut(&self.label) else {
            return;
        };
        if entry.date != self.date {
            return;
        }

        entry.reserved = (entry.reserved - self.amount).max(Decimal::ZERO);
        entry.committed += self.amount;
        entry.charge_count += 1;
        entry.last_charge = Some(Utc::now());

        debug!(
            label = %self.label,
            amount = %self.amount,
            committed = %entry.committed,
            "Committed daily spend"
        );
    }

    /// Give the reservation back without charging it
    pub fn release(mut self) {
        self.settled = true;
        self.give_back();
        debug!(label = %self.label, amount = %self.amount, "Released daily reservation");
    }

    fn give_back(&self) {
        let Some(mut entry) = self.ledger.entries.get_mut(&self.label) else {
            return;
        };
        if entry.date == self.date {
            entry.reserved = (entry.reserved - self.amount).max(Decimal::ZERO);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.give_back();
            warn!(
                label = %self.label,
                amount = %self.amount,
                "Reservation dropped before settling, released"
            );
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("label", &self.label)
            .field("amount", &self.amount)
            .field("date", &self.date)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Reservation refused because the limit would be exceeded
#[derive(Debug, Clone, PartialEq)]
pub struct LimitExceeded {
    pub used: Decimal,
    pub requested: Decimal,
    pub limit: Decimal,
}

/// Usage summary for one label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUsageReport {
    pub used: Decimal,
    pub limit: Decimal,
    pub remaining: Decimal,
}

/// Daily ledger keyed by wallet label
#[derive(Debug, Default)]
pub struct DailyLedger {
    entries: DashMap<String, DailyUsage>,
}

impl DailyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live usage (committed + reserved) for `label` on `today`
    pub fn usage(&self, label: &str, today: NaiveDate) -> Decimal {
        self.entries
            .get(label)
            .filter(|entry| entry.date == today)
            .map(|entry| entry.total())
            .unwrap_or(Decimal::ZERO)
    }

    /// Snapshot of the entry for `label`, if it is for `today`
    pub fn entry(&self, label: &str, today: NaiveDate) -> Option<DailyUsage> {
        self.entries
            .get(label)
            .filter(|entry| entry.date == today)
            .map(|entry| entry.value().clone())
    }

    /// Hold `amount` for `label` unless that would exceed `limit`
    pub fn try_reserve(
        self: &Arc<Self>,
        label: &str,
        amount: Decimal,
        limit: Decimal,
        today: NaiveDate,
    ) -> Result<Reservation, LimitExceeded> {
        let mut entry = self
            .entries
            .entry(label.to_string())
            .or_insert_with(|| DailyUsage::new(today));
        entry.reset_if_stale(today);

        let used = entry.total();
        if used + amount > limit {
            return Err(LimitExceeded {
                used: used.normalize(),
                requested: amount,
                limit,
            });
        }

        entry.reserved += amount;
        debug!(
            label = %label,
            amount = %amount,
            reserved = %entry.reserved,
            committed = %entry.committed,
            "Reserved daily allowance"
        );

        Ok(Reservation {
            ledger: Arc::clone(self),
            label: label.to_string(),
            amount,
            date: today,
            settled: false,
        })
    }

    /// Usage report against `limit`
    pub fn report(&self, label: &str, limit: Decimal, today: NaiveDate) -> DailyUsageReport {
        let used = self.usage(label, today);
        DailyUsageReport {
            used: used.normalize(),
            limit,
            remaining: (limit - used).max(Decimal::ZERO).normalize(),
        }
    }

    /// Forget every label's usage
    pub fn reset(&self) {
        self.entries.clear();
    }

    /// Labels with an entry (of any date)
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
