//! Guess creation and resolution
//!
//! `GuessLifecycle` owns the one-active-guess-per-user rule and the
//! exactly-once score change. Both protocols run inside an advisory lock:
//!
//! - make: lock `user-guess:<uid>`, check no active guess, snapshot price,
//!   schedule resolution, then write guess + user pointer in one batch
//! - resolve: lock `resolve-guess:<uid>:<id>`, skip missing/resolved guesses,
//!   enforce the time gate, score, then write guess + score + pointer in one batch
//!
//! Scheduling happens before the write. A crash in between leaves a task for a
//! guess that does not exist, which resolves as "not found"; the opposite order
//! could leave a pending guess nobody will ever resolve.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::error::{ErrorKind, GameError, GameResult};
use super::lock::{creation_lock_key, resolution_lock_key, LockManager};
use super::logic::{
    clamp_score_change, determine_result, generate_guess_id, is_valid_price, score_change,
};
use super::validation::{leaderboard_limit, normalize_last_key, require_delay, require_id};
use crate::models::{
    Guess, GuessHistoryEntry, GuessHistoryResponse, GuessResult, GuessStatus, LeaderboardEntry,
    LeaderboardResponse, MakeGuessResponse, Prediction, ResolveGuessResponse, User,
};
use crate::store::{GuessStore, Mutation, StoreError, UpdateBatch};
use crate::tasks::{Delivery, ResolveHandler, ResolveTask, TaskScheduler};

/// What a single `resolve_guess` call did.
///
/// Everything except `Resolved` is a routine no-op under at-least-once delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved {
        result: GuessResult,
        score_change: i64,
        resolved_price: f64,
    },
    InProgress,
    NotFound,
    AlreadyResolved,
}

impl ResolveOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            ResolveOutcome::Resolved { .. } => "Guess resolved successfully",
            ResolveOutcome::InProgress => "Resolution already in progress",
            ResolveOutcome::NotFound => "Guess not found",
            ResolveOutcome::AlreadyResolved => "Guess already resolved",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolveOutcome::Resolved { .. })
    }
}

impl From<ResolveOutcome> for ResolveGuessResponse {
    fn from(outcome: ResolveOutcome) -> Self {
        let message = outcome.message().to_string();
        match outcome {
            ResolveOutcome::Resolved {
                result,
                score_change,
                resolved_price,
            } => ResolveGuessResponse {
                success: true,
                message,
                result: Some(result),
                score_change: Some(score_change),
                resolved_price: Some(resolved_price),
            },
            _ => ResolveGuessResponse {
                success: false,
                message,
                result: None,
                score_change: None,
                resolved_price: None,
            },
        }
    }
}

pub struct GuessLifecycle {
    store: Arc<dyn GuessStore>,
    locks: LockManager,
    scheduler: Arc<dyn TaskScheduler>,
    clock: Arc<dyn Clock>,
}

impl GuessLifecycle {
    pub fn new(
        store: Arc<dyn GuessStore>,
        locks: LockManager,
        scheduler: Arc<dyn TaskScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            locks,
            scheduler,
            clock,
        }
    }

    pub async fn make_guess(
        &self,
        user_id: &str,
        prediction: Prediction,
        delay_seconds: i64,
    ) -> GameResult<MakeGuessResponse> {
        require_id("userId", user_id)?;
        require_delay(delay_seconds)?;

        let lock_key = creation_lock_key(user_id);
        if !self.locks.acquire(&lock_key).await? {
            debug!(user_id, "guess creation contended");
            return Err(GameError::Contention { lock_key });
        }

        let created = self.create_locked(user_id, prediction, delay_seconds).await;
        self.locks.release(&lock_key).await;
        created
    }

    async fn create_locked(
        &self,
        user_id: &str,
        prediction: Prediction,
        delay_seconds: i64,
    ) -> GameResult<MakeGuessResponse> {
        let user = self.store.get_user(user_id).await?;
        if user.as_ref().is_some_and(|u| u.active_guess_id.is_some()) {
            return Err(GameError::ActiveGuessExists {
                user_id: user_id.to_string(),
            });
        }

        let initial_price = self.reference_price().await?;
        let now = self.clock.now_ms();
        let guess_id = generate_guess_id(now);

        self.scheduler
            .schedule(
                ResolveTask::new(user_id, guess_id.as_str()),
                Duration::from_secs(delay_seconds as u64),
            )
            .await?;

        let guess = Guess::pending(
            guess_id.clone(),
            user_id.to_string(),
            prediction,
            initial_price,
            now,
            delay_seconds,
        );
        let pointer = match user {
            None => Mutation::CreateUser(User {
                uid: user_id.to_string(),
                score: 0,
                active_guess_id: Some(guess_id.clone()),
            }),
            Some(_) => Mutation::SetActiveGuess {
                uid: user_id.to_string(),
                guess_id: Some(guess_id.clone()),
            },
        };
        self.store
            .commit(UpdateBatch::new().push(Mutation::PutGuess(guess)).push(pointer))
            .await?;

        info!(
            user_id,
            guess_id = %guess_id,
            prediction = prediction.as_str(),
            initial_price,
            delay_seconds,
            "🎯 Guess created"
        );

        Ok(MakeGuessResponse {
            success: true,
            guess_id,
            initial_price,
            message: "Guess successfully created".to_string(),
        })
    }

    pub async fn resolve_guess(&self, user_id: &str, guess_id: &str) -> GameResult<ResolveOutcome> {
        require_id("userId", user_id)?;
        require_id("guessId", guess_id)?;

        let lock_key = resolution_lock_key(user_id, guess_id);
        if !self.locks.acquire(&lock_key).await? {
            debug!(user_id, guess_id, "resolution already in progress");
            return Ok(ResolveOutcome::InProgress);
        }

        let resolved = self.resolve_locked(user_id, guess_id).await;
        self.locks.release(&lock_key).await;
        resolved
    }

    async fn resolve_locked(&self, user_id: &str, guess_id: &str) -> GameResult<ResolveOutcome> {
        let guess = self.store.get_guess(user_id, guess_id).await?;
        let user_score = self.store.get_user_score(user_id).await?;

        let Some(mut guess) = guess else {
            return Ok(ResolveOutcome::NotFound);
        };
        if !guess.is_pending() {
            return Ok(ResolveOutcome::AlreadyResolved);
        }

        let now = self.clock.now_ms();
        let eligible_at = guess.eligible_at();
        if now < eligible_at {
            return Err(GameError::TooEarly {
                guess_id: guess_id.to_string(),
                eligible_at,
                now,
            });
        }

        let resolved_price = self.reference_price().await?;
        let result = determine_result(guess.prediction, guess.initial_price, resolved_price);
        let applied = clamp_score_change(user_score, score_change(result));

        guess.status = GuessStatus::Resolved;
        guess.resolved_price = Some(resolved_price);
        guess.resolved_at = Some(self.clock.now_ms());
        guess.result = Some(result);

        // The score comes from the read above. Only the resolution lock keeps
        // that read current; there is no re-check at write time.
        let batch = UpdateBatch::new()
            .push(Mutation::PutGuess(guess))
            .push(Mutation::SetScore {
                uid: user_id.to_string(),
                score: user_score + applied,
            })
            .push(Mutation::SetActiveGuess {
                uid: user_id.to_string(),
                guess_id: None,
            });
        self.store.commit(batch).await?;

        info!(
            user_id,
            guess_id,
            result = result.as_str(),
            score_change = applied,
            resolved_price,
            "✅ Guess resolved"
        );

        Ok(ResolveOutcome::Resolved {
            result,
            score_change: applied,
            resolved_price,
        })
    }

    pub async fn get_leaderboard(&self, limit: usize) -> GameResult<LeaderboardResponse> {
        let limit = leaderboard_limit(limit)?;
        let users = self.store.top_users(limit).await?;
        Ok(LeaderboardResponse {
            success: true,
            leaderboard: users
                .into_iter()
                .map(|u| LeaderboardEntry {
                    uid: u.uid,
                    score: u.score,
                })
                .collect(),
        })
    }

    /// Newest first. Fetches one extra row to tell whether another page exists.
    pub async fn get_guess_history(
        &self,
        user_id: &str,
        last_key: Option<&str>,
        page_size: usize,
    ) -> GameResult<GuessHistoryResponse> {
        require_id("userId", user_id)?;
        if page_size == 0 {
            return Err(GameError::validation("pageSize", "Page size must be positive"));
        }

        let mut guesses = self
            .store
            .guesses_before(user_id, normalize_last_key(last_key), page_size + 1)
            .await?;

        let has_next_page = guesses.len() > page_size;
        guesses.truncate(page_size);
        let next_page_key = if has_next_page {
            guesses.last().map(|g| g.id.clone())
        } else {
            None
        };

        Ok(GuessHistoryResponse {
            success: true,
            guesses: guesses.into_iter().map(GuessHistoryEntry::from).collect(),
            has_next_page,
            next_page_key,
        })
    }

    /// Schedule every pending guess again. Run once at startup so a restart
    /// never strands a guess whose task lived only in the old process.
    pub async fn reschedule_pending(&self) -> GameResult<usize> {
        let pending = self.store.pending_guesses().await?;
        let now = self.clock.now_ms();

        for guess in &pending {
            let wait_ms = guess.eligible_at().saturating_sub(now).max(0) as u64;
            self.scheduler
                .schedule(
                    ResolveTask::new(guess.user_id.as_str(), guess.id.as_str()),
                    Duration::from_millis(wait_ms),
                )
                .await?;
        }

        if !pending.is_empty() {
            info!(count = pending.len(), "🔁 Rescheduled pending guesses");
        }
        Ok(pending.len())
    }

    async fn reference_price(&self) -> GameResult<f64> {
        match self.store.current_price().await? {
            Some(price) if is_valid_price(price) => Ok(price),
            Some(price) => Err(StoreError::new("getPrice", format!("invalid reference price {price}")).into()),
            None => Err(StoreError::new("getPrice", "no reference price recorded").into()),
        }
    }
}

#[async_trait]
impl ResolveHandler for GuessLifecycle {
    async fn deliver(&self, task: &ResolveTask) -> Delivery {
        match self.resolve_guess(&task.user_id, &task.guess_id).await {
            // Another delivery holds the lock. Come back once it must have
            // finished or expired; that visit sees "already resolved".
            Ok(ResolveOutcome::InProgress) => {
                Delivery::RetryAfter(Duration::from_millis(self.locks.ttl_ms().max(0) as u64))
            }
            Ok(outcome) => {
                if !outcome.is_resolved() {
                    debug!(
                        user_id = %task.user_id,
                        guess_id = %task.guess_id,
                        outcome = outcome.message(),
                        "resolution was a no-op"
                    );
                }
                Delivery::Done
            }
            Err(GameError::TooEarly {
                eligible_at, now, ..
            }) => Delivery::RetryAfter(Duration::from_millis(
                eligible_at.saturating_sub(now).max(0) as u64,
            )),
            Err(e) if e.kind() == ErrorKind::Validation => {
                warn!(
                    user_id = %task.user_id,
                    guess_id = %task.guess_id,
                    error = %e,
                    "dropping malformed resolution task"
                );
                Delivery::Done
            }
            Err(e) => Delivery::Failed(e.to_string()),
        }
    }
}
