//! Wire protocol: events pushed to clients and commands accepted from
//! them. All payloads are explicit serde schemas; malformed input is
//! rejected at this boundary before it reaches the ledger.

use crate::stats::RoundStats;
use crate::types::{BetResult, RoundId, RoundState, Side, UserId};
use serde::{Deserialize, Serialize};

/// Who an event is for. Lifecycle events go to everyone; bet results,
/// login replies and credit decisions go only to the owning user's
/// connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    All,
    User(UserId),
}

/// An event together with its delivery scope, as published on the
/// engine's broadcast channel. Only `event` crosses the wire.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub recipient: Recipient,
    pub event: EngineEvent,
}

impl Envelope {
    pub fn all(event: EngineEvent) -> Self {
        Self {
            recipient: Recipient::All,
            event,
        }
    }

    pub fn user(user_id: UserId, event: EngineEvent) -> Self {
        Self {
            recipient: Recipient::User(user_id),
            event,
        }
    }
}

/// Events emitted by the round engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    RoundStart { id: RoundId, duration: u64 },

    #[serde(rename_all = "camelCase")]
    RoundTick {
        id: RoundId,
        remaining: u64,
        duration: u64,
    },

    RoundStats {
        #[serde(flatten)]
        stats: RoundStats,
    },

    #[serde(rename_all = "camelCase")]
    RoundEnd { id: RoundId },

    #[serde(rename_all = "camelCase")]
    RoundSummary {
        round_id: RoundId,
        stats: RoundStats,
        winner: Side,
        die: u8,
    },

    #[serde(rename_all = "camelCase")]
    RoundNext { starts_in: u64 },

    #[serde(rename_all = "camelCase")]
    RoundNextTick { remaining: u64 },

    /// Current round context for a party that connects mid-cycle.
    #[serde(rename_all = "camelCase")]
    RoundState {
        id: RoundId,
        state: RoundState,
        remaining: u64,
        duration: u64,
    },

    #[serde(rename_all = "camelCase")]
    BetAccepted {
        round_id: RoundId,
        amount: u64,
        side: Side,
    },

    BetResult {
        #[serde(flatten)]
        body: BetResultBody,
    },

    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        id: UserId,
        chips: u64,
        rating: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        credit_eligible: Option<bool>,
    },

    #[serde(rename_all = "camelCase")]
    UserData {
        id: UserId,
        username: String,
        chips: u64,
        rating: i64,
        credit_eligible: bool,
    },

    CreditResult {
        #[serde(flatten)]
        body: CreditResultBody,
    },

    #[serde(rename_all = "camelCase")]
    Leaderboard { players: Vec<LeaderboardEntry> },

    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

/// A bet result is either the settled outcome or a per-bet error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BetResultBody {
    Ok(BetResult),
    Err { error: String, code: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreditResultBody {
    #[serde(rename_all = "camelCase")]
    Granted {
        success: bool,
        grant: u64,
        new_chips: u64,
    },
    Denied { error: String, code: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: UserId,
    pub username: String,
    pub chips: u64,
    pub rating: i64,
}

/// Commands accepted from a connection. The user identity is never
/// part of a command; it is bound server-side at login.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    RequestLogin { username: Option<String> },

    /// Loosely typed on purpose: amount and side are validated by the
    /// engine so the caller gets a precise error instead of a generic
    /// parse failure. `amount` accepts any JSON number; the transport
    /// floors it to whole chips.
    #[serde(rename_all = "camelCase")]
    PlaceBet {
        round_id: String,
        amount: f64,
        side: String,
    },

    #[serde(rename_all = "camelCase")]
    RequestCredit { needed: Option<u64> },
}
