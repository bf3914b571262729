//! Chip reservation and settlement ledger.
//!
//! The ledger is the only component allowed to move chips. A bet's
//! stake is deducted at acceptance time through the store's atomic
//! reserve primitive and held until settlement or void; the
//! per-user outstanding counter tracks those holds as a gating signal
//! for other ledger-affecting operations (credit grants), never as a
//! second balance.

use crate::errors::{EngineError, Result};
use crate::store::{UserRef, UserStore};
use crate::types::{Bet, BetId, ReservationState, RoundId, Side, User};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct BetLedger {
    store: Arc<dyn UserStore>,
    outstanding: DashMap<crate::types::UserId, u64>,
    bets: DashMap<BetId, Bet>,
}

impl BetLedger {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            outstanding: DashMap::new(),
            bets: DashMap::new(),
        }
    }

    /// Reserve `amount` chips for a bet. On success the stake is
    /// already deducted from the balance and the bet is `Reserved`.
    ///
    /// The deduction itself is the store's atomic decrement-if-enough,
    /// so two concurrent reservations can never both succeed beyond the
    /// available balance.
    pub async fn reserve(
        &self,
        user_id: crate::types::UserId,
        amount: u64,
        round_id: RoundId,
        side: Side,
    ) -> Result<(Bet, User)> {
        if amount == 0 {
            return Err(EngineError::InvalidAmount);
        }
        if self
            .store
            .get_user(&UserRef::Id(user_id))
            .await?
            .is_none()
        {
            return Err(EngineError::UserNotFound);
        }

        let user = self
            .store
            .try_reserve(user_id, amount)
            .await?
            .ok_or(EngineError::InsufficientFunds)?;

        *self.outstanding.entry(user_id).or_insert(0) += amount;

        let bet = Bet {
            id: Uuid::new_v4(),
            round_id,
            user_id,
            amount,
            side,
            state: ReservationState::Reserved,
        };
        self.bets.insert(bet.id, bet.clone());
        Ok((bet, user))
    }

    /// Apply a bet's payout and rating delta exactly once.
    ///
    /// `payout` is the gross amount credited back (stake plus winnings
    /// on a win, zero on a loss); the stake was deducted at
    /// reservation. A second settle of the same bet fails with
    /// `AlreadySettled` and moves no chips.
    pub async fn settle(&self, bet_id: BetId, payout: u64, rating_delta: i64) -> Result<User> {
        let (user_id, amount) = self.claim(bet_id, ReservationState::Settled)?;

        let commit = async {
            let user = self
                .store
                .get_user(&UserRef::Id(user_id))
                .await?
                .ok_or(EngineError::UserNotFound)?;
            self.store
                .commit_balance_and_rating(
                    user_id,
                    user.chips + payout,
                    user.rating + rating_delta,
                )
                .await
        };

        match commit.await {
            Ok(updated) => {
                self.release_outstanding(user_id, amount);
                Ok(updated)
            }
            Err(e) => {
                // The store rejected the commit. Release the hold so the
                // user is not left permanently credit-ineligible, and
                // report the bet as failed rather than settled.
                if let Some(mut bet) = self.bets.get_mut(&bet_id) {
                    bet.state = ReservationState::Voided;
                }
                self.release_outstanding(user_id, amount);
                warn!(%bet_id, user_id, error = %e, "settlement commit failed; reservation released");
                Err(EngineError::SettlementFailure {
                    bet_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Release a reservation without settling it: the stake is refunded
    /// and the bet becomes `Voided`. Used when a bet misses its round.
    pub async fn void(&self, bet_id: BetId) -> Result<User> {
        let (user_id, amount) = self.claim(bet_id, ReservationState::Voided)?;

        let user = self
            .store
            .get_user(&UserRef::Id(user_id))
            .await?
            .ok_or(EngineError::UserNotFound)?;
        let updated = self
            .store
            .commit_balance_and_rating(user_id, user.chips + amount, user.rating)
            .await?;
        self.release_outstanding(user_id, amount);
        Ok(updated)
    }

    /// Sum of this user's currently reserved stakes. Gating signal
    /// only; never authorizes a reservation.
    pub fn outstanding(&self, user_id: crate::types::UserId) -> u64 {
        self.outstanding
            .get(&user_id)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    pub fn bet(&self, bet_id: BetId) -> Option<Bet> {
        self.bets.get(&bet_id).map(|entry| entry.value().clone())
    }

    /// Atomically move a `Reserved` bet to its terminal state, claiming
    /// the right to apply its balance effects.
    fn claim(
        &self,
        bet_id: BetId,
        target: ReservationState,
    ) -> Result<(crate::types::UserId, u64)> {
        let mut entry = self
            .bets
            .get_mut(&bet_id)
            .ok_or(EngineError::UnknownBet(bet_id))?;
        let bet = entry.value_mut();
        if bet.state != ReservationState::Reserved {
            return Err(EngineError::AlreadySettled(bet_id));
        }
        bet.state = target;
        Ok((bet.user_id, bet.amount))
    }

    fn release_outstanding(&self, user_id: crate::types::UserId, amount: u64) {
        if let Some(mut entry) = self.outstanding.get_mut(&user_id) {
            *entry.value_mut() = entry.value().saturating_sub(amount);
        }
    }
}
