//! Tiltzero - Recurring Two-Outcome Betting Round Engine
//!
//! Runs a fixed-cadence cycle of short betting rounds: a 10s open
//! window, a single die roll deciding red vs blue, atomic settlement
//! of every accepted bet, then a short pause before the next round.
//! Clients attach over a websocket and receive the full event stream.

pub mod barrier;
pub mod config;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod scheduler;
pub mod server;
pub mod settlement;
pub mod stats;
pub mod store;
pub mod types;
pub mod ws;

pub use errors::{EngineError, Result};
pub use scheduler::RoundEngine;
pub use types::{Bet, BetOutcome, BetResult, RoundState, Side, User};
