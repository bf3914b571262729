//! Running per-round aggregates. Pure accounting over accepted bets.

use crate::types::Side;
use serde::{Deserialize, Serialize};

/// Per-round totals broadcast alongside countdown ticks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
    pub red_count: u64,
    pub blue_count: u64,
    pub red_total: u64,
    pub blue_total: u64,
    pub total_pot: u64,
}

/// Accumulates stats for the current round. Recording happens on the
/// bet-acceptance path, after the reservation succeeds, so the ledger
/// and the stats never diverge.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: RoundStats,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, side: Side, amount: u64) {
        match side {
            Side::Red => {
                self.stats.red_count += 1;
                self.stats.red_total += amount;
            }
            Side::Blue => {
                self.stats.blue_count += 1;
                self.stats.blue_total += amount;
            }
        }
        self.stats.total_pot = self.stats.red_total + self.stats.blue_total;
    }

    /// Immutable copy for broadcast; the live structure is never shared.
    pub fn snapshot(&self) -> RoundStats {
        self.stats.clone()
    }
}
