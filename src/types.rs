//! Domain model shared by the ledger, scheduler and transport layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Server-assigned user identifier. Clients never supply this directly;
/// it is bound to a connection at login.
pub type UserId = u64;

/// Identifier of a single betting round.
pub type RoundId = Uuid;

/// Identifier of a single bet within a round.
pub type BetId = Uuid;

/// The two sides of the game. One die roll decides the round:
/// faces 1-3 win for Red, faces 4-6 win for Blue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Red,
    Blue,
}

impl Side {
    /// Map a die face (1..=6) to the winning side.
    pub fn from_die(die: u8) -> Side {
        if (1..=3).contains(&die) {
            Side::Red
        } else {
            Side::Blue
        }
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(Side::Red),
            "blue" => Ok(Side::Blue),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Red => write!(f, "red"),
            Side::Blue => write!(f, "blue"),
        }
    }
}

/// A player record as held by the user store.
///
/// `chips` is unsigned on purpose: a balance can never go negative, and
/// every deduction happens through the store's atomic reserve primitive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub chips: u64,
    pub rating: i64,
}

/// Lifecycle of a reservation. `Reserved -> Settled` and
/// `Reserved -> Voided` are the only legal transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationState {
    Reserved,
    Settled,
    Voided,
}

/// A single accepted bet. Belongs to exactly one round; appended to the
/// round's bet list only while acceptance for that round is ongoing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub amount: u64,
    pub side: Side,
    pub state: ReservationState,
}

/// Round lifecycle. Transitions are strictly forward; exactly one round
/// is current at any instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    Pending,
    Open,
    Closed,
    Settling,
    Paused,
}

/// Outcome of one settled bet, as reported to its owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetResult {
    pub user_id: UserId,
    pub username: String,
    pub round_id: RoundId,
    pub amount: u64,
    pub side: Side,
    pub die: u8,
    pub outcome: Side,
    pub result: BetOutcome,
    /// Net effect relative to the pre-reservation balance:
    /// `+amount` on a win, `-amount` on a loss.
    pub change: i64,
    pub new_chips: u64,
    pub rating_change: i64,
    pub new_rating: i64,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetOutcome {
    Win,
    Lose,
}

/// Immutable view of the current round, answered to parties that join
/// mid-cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub round_id: RoundId,
    pub state: RoundState,
    pub remaining_ms: u64,
    pub duration_ms: u64,
    pub stats: crate::stats::RoundStats,
}
