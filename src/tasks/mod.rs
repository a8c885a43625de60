//! Delayed resolution tasks
//!
//! `TaskScheduler` is the capability the game engine consumes: "call the
//! resolver for (user, guess) no earlier than `delay` from now". Delivery is
//! at-least-once; the resolver must tolerate duplicates.

pub mod queue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use queue::{task_queue, RetryPolicy, TaskQueue, TaskWorker};

/// Payload handed back to the resolver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ResolveTask {
    pub user_id: String,
    pub guess_id: String,
}

impl ResolveTask {
    pub fn new(user_id: impl Into<String>, guess_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            guess_id: guess_id.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("task queue is closed")]
    QueueClosed,
    #[error("failed to schedule resolution of guess {guess_id} for user {user_id}: {reason}")]
    Rejected {
        user_id: String,
        guess_id: String,
        reason: String,
    },
}

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule(&self, task: ResolveTask, delay: Duration) -> Result<(), SchedulingError>;
}

/// What the resolver made of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Finished, including routine no-ops. Do not redeliver.
    Done,
    /// Delivered too early; try again after the given wait.
    RetryAfter(Duration),
    /// Hard failure; redeliver with backoff.
    Failed(String),
}

#[async_trait]
pub trait ResolveHandler: Send + Sync {
    async fn deliver(&self, task: &ResolveTask) -> Delivery;
}
