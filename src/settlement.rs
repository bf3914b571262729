//! Round settlement: one die roll decides every bet in the round.

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::ledger::BetLedger;
use crate::types::{Bet, BetOutcome, BetResult, Side, UserId};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SettlementEngine {
    ledger: Arc<BetLedger>,
    payout_multiplier: u64,
    rating_win_delta: i64,
    rating_loss_delta: i64,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<BetLedger>, config: &EngineConfig) -> Self {
        Self {
            ledger,
            payout_multiplier: config.payout_multiplier,
            rating_win_delta: config.rating_win_delta,
            rating_loss_delta: config.rating_loss_delta,
        }
    }

    /// Roll the round's authoritative die: uniform over 1..=6, three
    /// faces per side. Called exactly once per round; the same value is
    /// applied to every bet.
    pub fn roll_die(&self) -> u8 {
        rand::thread_rng().gen_range(1..=6)
    }

    /// Settle a single bet against the round's die value.
    pub async fn settle_bet(&self, bet: &Bet, die: u8) -> Result<BetResult> {
        let outcome = Side::from_die(die);
        let won = bet.side == outcome;
        let payout = if won {
            self.payout_multiplier * bet.amount
        } else {
            0
        };
        let rating_delta = if won {
            self.rating_win_delta
        } else {
            self.rating_loss_delta
        };

        let user = self.ledger.settle(bet.id, payout, rating_delta).await?;

        Ok(BetResult {
            user_id: user.id,
            username: user.username.clone(),
            round_id: bet.round_id,
            amount: bet.amount,
            side: bet.side,
            die,
            outcome,
            result: if won { BetOutcome::Win } else { BetOutcome::Lose },
            change: payout as i64 - bet.amount as i64,
            new_chips: user.chips,
            rating_change: rating_delta,
            new_rating: user.rating,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Settle the round's frozen bet list. A failing bet is logged and
    /// reported on its own; it never stops the remaining bets from
    /// settling.
    pub async fn settle_round(&self, bets: &[Bet], die: u8) -> Vec<(UserId, Result<BetResult>)> {
        debug!(die, bet_count = bets.len(), "settling round");
        let mut results = Vec::with_capacity(bets.len());
        for bet in bets {
            match self.settle_bet(bet, die).await {
                Ok(result) => results.push((bet.user_id, Ok(result))),
                Err(e) => {
                    warn!(bet_id = %bet.id, user_id = bet.user_id, error = %e, "bet settlement failed");
                    results.push((
                        bet.user_id,
                        Err(EngineError::SettlementFailure {
                            bet_id: bet.id,
                            reason: e.to_string(),
                        }),
                    ));
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::{MemoryStore, UserStore};
    use crate::types::User;
    use uuid::Uuid;

    async fn engine_with_user(chips: u64) -> (SettlementEngine, Arc<BetLedger>, User) {
        let store = Arc::new(MemoryStore::new(chips, 1_000));
        let user = store.create_user("player").await.unwrap();
        let ledger = Arc::new(BetLedger::new(store));
        let engine = SettlementEngine::new(ledger.clone(), &EngineConfig::default());
        (engine, ledger, user)
    }

    #[tokio::test]
    async fn test_winning_bet_doubles_stake() {
        // Balance 100, bet 50 on red, die rolls red: final 150, +10 rating.
        let (engine, ledger, user) = engine_with_user(100).await;
        let round = Uuid::new_v4();
        let (bet, _) = ledger.reserve(user.id, 50, round, Side::Red).await.unwrap();

        let result = engine.settle_bet(&bet, 2).await.unwrap();
        assert_eq!(result.result, BetOutcome::Win);
        assert_eq!(result.outcome, Side::Red);
        assert_eq!(result.change, 50);
        assert_eq!(result.new_chips, 150);
        assert_eq!(result.rating_change, 10);
        assert_eq!(result.new_rating, 1_010);
    }

    #[tokio::test]
    async fn test_losing_bet_forfeits_stake() {
        // Balance 100, bet 50 on red, die rolls blue: final 50, -7 rating.
        let (engine, ledger, user) = engine_with_user(100).await;
        let round = Uuid::new_v4();
        let (bet, _) = ledger.reserve(user.id, 50, round, Side::Red).await.unwrap();

        let result = engine.settle_bet(&bet, 5).await.unwrap();
        assert_eq!(result.result, BetOutcome::Lose);
        assert_eq!(result.outcome, Side::Blue);
        assert_eq!(result.change, -50);
        assert_eq!(result.new_chips, 50);
        assert_eq!(result.rating_change, -7);
        assert_eq!(result.new_rating, 993);
    }

    #[tokio::test]
    async fn test_one_bad_bet_does_not_abort_the_round() {
        let (engine, ledger, user) = engine_with_user(200).await;
        let round = Uuid::new_v4();
        let (good, _) = ledger.reserve(user.id, 30, round, Side::Red).await.unwrap();
        let (stale, _) = ledger.reserve(user.id, 40, round, Side::Blue).await.unwrap();

        // Settle one bet out-of-band so the batch sees it already done.
        engine.settle_bet(&stale, 2).await.unwrap();

        let results = engine.settle_round(&[stale.clone(), good.clone()], 2).await;
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].1,
            Err(EngineError::SettlementFailure { .. })
        ));
        let winner = results[1].1.as_ref().unwrap();
        assert_eq!(winner.result, BetOutcome::Win);
    }

    #[tokio::test]
    async fn test_same_die_drives_every_bet() {
        let (engine, ledger, user) = engine_with_user(1_000).await;
        let round = Uuid::new_v4();
        let mut bets = Vec::new();
        for side in [Side::Red, Side::Blue, Side::Red] {
            let (bet, _) = ledger.reserve(user.id, 10, round, side).await.unwrap();
            bets.push(bet);
        }

        let results = engine.settle_round(&bets, 4).await;
        for (_, result) in &results {
            let result = result.as_ref().unwrap();
            assert_eq!(result.die, 4);
            assert_eq!(result.outcome, Side::Blue);
        }
    }

    #[test]
    fn test_die_stays_in_range() {
        let store = Arc::new(MemoryStore::new(0, 0));
        let ledger = Arc::new(BetLedger::new(store));
        let engine = SettlementEngine::new(ledger, &EngineConfig::default());
        for _ in 0..100 {
            let die = engine.roll_die();
            assert!((1..=6).contains(&die));
        }
    }
}
