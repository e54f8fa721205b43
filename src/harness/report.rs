use std::fmt;
use std::time::Duration;

use crate::reservation::types::{Outcome, ReservationAttempt};
use crate::storage::shard_store::StockSnapshot;

/// Attempt counts per outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub success: usize,
    pub insufficient_stock: usize,
    pub lock_failure: usize,
    pub transfer_failure: usize,
    /// Attempts that moved stock from the global reserve.
    pub refills: usize,
    /// Units moved from the global reserve across all attempts.
    pub refilled_units: i64,
}

impl OutcomeCounts {
    pub fn record(&mut self, attempt: &ReservationAttempt) {
        match attempt.outcome {
            Outcome::Success => self.success += 1,
            Outcome::InsufficientStock => self.insufficient_stock += 1,
            Outcome::LockFailure => self.lock_failure += 1,
            Outcome::TransferFailure => self.transfer_failure += 1,
        }
        if let Some(amount) = attempt.refilled {
            self.refills += 1;
            self.refilled_units += amount;
        }
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.success += other.success;
        self.insufficient_stock += other.insufficient_stock;
        self.lock_failure += other.lock_failure;
        self.transfer_failure += other.transfer_failure;
        self.refills += other.refills;
        self.refilled_units += other.refilled_units;
    }

    pub fn total(&self) -> usize {
        self.success + self.insufficient_stock + self.lock_failure + self.transfer_failure
    }

    pub fn failures(&self) -> usize {
        self.total() - self.success
    }
}

#[derive(Debug, Clone)]
pub struct HarnessReport {
    pub product_id: String,
    pub counts: OutcomeCounts,
    pub initial_total: i64,
    pub final_snapshot: StockSnapshot,
    /// Lowest value any counter showed while the run was in flight.
    pub min_observed: i64,
    pub elapsed: Duration,
}

impl HarnessReport {
    /// No stock was created or destroyed: `initial - successes == final`.
    pub fn conserved(&self) -> bool {
        self.initial_total - self.counts.success as i64 == self.final_snapshot.total()
    }

    pub fn never_negative(&self) -> bool {
        self.min_observed >= 0 && self.final_snapshot.min_counter() >= 0
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "product {}: {} attempts in {:?}",
            self.product_id,
            self.counts.total(),
            self.elapsed
        )?;
        writeln!(
            f,
            "  success {} | insufficient {} | lock failure {} | transfer failure {}",
            self.counts.success,
            self.counts.insufficient_stock,
            self.counts.lock_failure,
            self.counts.transfer_failure
        )?;
        writeln!(
            f,
            "  refills {} ({} units from global)",
            self.counts.refills, self.counts.refilled_units
        )?;
        for (shard, remaining) in &self.final_snapshot.shards {
            writeln!(f, "  shard {:>3}: {}", shard, remaining)?;
        }
        writeln!(f, "  global   : {}", self.final_snapshot.global)?;
        writeln!(
            f,
            "  remaining {} of {} | conserved {} | min observed {}",
            self.final_snapshot.total(),
            self.initial_total,
            self.conserved(),
            self.min_observed
        )
    }
}
