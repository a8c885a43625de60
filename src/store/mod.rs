//! Persistence capabilities consumed by the game engine
//!
//! The engine never talks to a database directly. It needs two things:
//! - `LockStore`: single-key optimistic read-modify-write on lock markers
//! - `GuessStore`: point reads, an all-or-nothing multi-path write, and the
//!   two sorted/paged queries behind the leaderboard and history views
//!
//! `MemoryStore` and `SqliteStore` implement both.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Guess, LockRecord, User};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Upper bound on how often an optimistic update is re-run after losing a race.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 25;

/// Failure talking to the persistence layer. `operation` names the store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("store operation `{operation}` failed: {message}")]
pub struct StoreError {
    pub operation: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Outcome of an optimistic single-key update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction<T> {
    /// Whether the update function's value was written.
    pub committed: bool,
    /// Value stored at the key once the call returned.
    pub snapshot: Option<T>,
}

/// Update function for `LockStore::transact`. Returning `None` aborts.
pub type LockUpdate<'a> = &'a (dyn Fn(Option<&LockRecord>) -> Option<LockRecord> + Send + Sync);

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Optimistic compare-and-update of the lock marker at `locks/<key>`.
    ///
    /// `update` sees the current value. Its result is written only if the
    /// stored value is unchanged at commit time; otherwise `update` is re-run
    /// against the newer value.
    async fn transact(
        &self,
        key: &str,
        update: LockUpdate<'_>,
    ) -> Result<Transaction<LockRecord>, StoreError>;

    /// Unconditionally remove the marker. Removing an absent key succeeds.
    async fn clear(&self, key: &str) -> Result<(), StoreError>;
}

/// One path write inside an `UpdateBatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Write `users/<uid>` in full.
    CreateUser(User),
    /// Write `guesses/<uid>/<id>` in full.
    PutGuess(Guess),
    /// Write `users/<uid>/activeGuessId`. The user must exist.
    SetActiveGuess {
        uid: String,
        guess_id: Option<String>,
    },
    /// Write `users/<uid>/score`. The user must exist.
    SetScore { uid: String, score: i64 },
}

/// A multi-path write applied all-or-nothing by `GuessStore::commit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    mutations: Vec<Mutation>,
}

impl UpdateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}

#[async_trait]
pub trait GuessStore: Send + Sync {
    async fn get_user(&self, uid: &str) -> Result<Option<User>, StoreError>;

    /// Score of `uid`; a user that does not exist yet reads as zero.
    async fn get_user_score(&self, uid: &str) -> Result<i64, StoreError>;

    async fn get_guess(&self, uid: &str, guess_id: &str) -> Result<Option<Guess>, StoreError>;

    /// Raw reference price. Validation is the caller's job.
    async fn current_price(&self) -> Result<Option<f64>, StoreError>;

    async fn record_price(&self, price: f64) -> Result<(), StoreError>;

    /// Apply every mutation or none of them.
    async fn commit(&self, batch: UpdateBatch) -> Result<(), StoreError>;

    /// Users ordered by score descending, ties by uid ascending.
    async fn top_users(&self, limit: usize) -> Result<Vec<User>, StoreError>;

    /// Up to `limit` guesses of `uid` with id strictly below `end_before`
    /// (all ids when `None`), ordered by id descending.
    async fn guesses_before(
        &self,
        uid: &str,
        end_before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Guess>, StoreError>;

    /// Every guess still pending, across all users.
    async fn pending_guesses(&self) -> Result<Vec<Guess>, StoreError>;
}
