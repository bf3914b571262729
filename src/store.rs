//! User persistence collaborator.
//!
//! The engine never mutates user records directly; everything goes
//! through this trait. `try_reserve` is the store-level atomic
//! "decrement if balance is sufficient" primitive that backs
//! `BetLedger::reserve`.

use crate::errors::{EngineError, Result};
use crate::types::{User, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lookup handle accepted by `get_user`: either the server-assigned id
/// or a display name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserRef {
    Id(UserId),
    Name(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user: &UserRef) -> Result<Option<User>>;

    /// Create a user with starting chips and rating. If the name is
    /// already taken the existing user is returned.
    async fn create_user(&self, username: &str) -> Result<User>;

    /// Atomically deduct `amount` if the balance covers it. Returns the
    /// updated user on success, `None` on shortfall.
    async fn try_reserve(&self, id: UserId, amount: u64) -> Result<Option<User>>;

    /// Commit balance and rating in one write.
    async fn commit_balance_and_rating(&self, id: UserId, chips: u64, rating: i64)
        -> Result<User>;

    /// Top `n` users ordered by rating, highest first.
    async fn top_by_rating(&self, n: usize) -> Result<Vec<User>>;
}

/// In-memory store. Per-entry mutation goes through a `DashMap` entry
/// guard, which gives `try_reserve` its single-writer critical section.
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    by_name: DashMap<String, UserId>,
    next_id: AtomicU64,
    starting_chips: u64,
    starting_rating: i64,
}

impl MemoryStore {
    pub fn new(starting_chips: u64, starting_rating: i64) -> Self {
        Self {
            users: DashMap::new(),
            by_name: DashMap::new(),
            next_id: AtomicU64::new(1),
            starting_chips,
            starting_rating,
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user: &UserRef) -> Result<Option<User>> {
        let id = match user {
            UserRef::Id(id) => *id,
            UserRef::Name(name) => match self.by_name.get(name) {
                Some(entry) => *entry.value(),
                None => return Ok(None),
            },
        };
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn create_user(&self, username: &str) -> Result<User> {
        // Name uniqueness: the entry API decides the winner when two
        // creations race on the same name.
        let id = *self
            .by_name
            .entry(username.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst));

        let user = self
            .users
            .entry(id)
            .or_insert_with(|| User {
                id,
                username: username.to_string(),
                chips: self.starting_chips,
                rating: self.starting_rating,
            })
            .value()
            .clone();
        Ok(user)
    }

    async fn try_reserve(&self, id: UserId, amount: u64) -> Result<Option<User>> {
        if amount == 0 {
            return Ok(None);
        }
        match self.users.get_mut(&id) {
            Some(mut entry) => {
                let user = entry.value_mut();
                if user.chips >= amount {
                    user.chips -= amount;
                    Ok(Some(user.clone()))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    async fn commit_balance_and_rating(
        &self,
        id: UserId,
        chips: u64,
        rating: i64,
    ) -> Result<User> {
        match self.users.get_mut(&id) {
            Some(mut entry) => {
                let user = entry.value_mut();
                user.chips = chips;
                user.rating = rating;
                Ok(user.clone())
            }
            None => Err(EngineError::UserNotFound),
        }
    }

    async fn top_by_rating(&self, n: usize) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.id.cmp(&b.id)));
        users.truncate(n);
        Ok(users)
    }
}
