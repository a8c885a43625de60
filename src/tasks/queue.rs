//! In-process delayed task queue
//!
//! `TaskQueue` is the producer half handed to the game engine. `TaskWorker`
//! owns the receiving end: every envelope gets its own tokio task that sleeps
//! until due, delivers, and re-enqueues itself on failure.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Delivery, ResolveHandler, ResolveTask, SchedulingError, TaskScheduler};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before delivery number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[derive(Debug)]
struct Envelope {
    task: ResolveTask,
    due: Instant,
    attempt: u32,
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Envelope>,
}

pub struct TaskWorker {
    rx: mpsc::UnboundedReceiver<Envelope>,
    tx: mpsc::UnboundedSender<Envelope>,
    policy: RetryPolicy,
}

pub fn task_queue(policy: RetryPolicy) -> (TaskQueue, TaskWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TaskQueue { tx: tx.clone() },
        TaskWorker { rx, tx, policy },
    )
}

#[async_trait]
impl TaskScheduler for TaskQueue {
    async fn schedule(&self, task: ResolveTask, delay: Duration) -> Result<(), SchedulingError> {
        debug!(
            user_id = %task.user_id,
            guess_id = %task.guess_id,
            delay_ms = delay.as_millis() as u64,
            "scheduling guess resolution"
        );
        self.tx
            .send(Envelope {
                task,
                due: Instant::now() + delay,
                attempt: 1,
            })
            .map_err(|_| SchedulingError::QueueClosed)
    }
}

impl TaskWorker {
    /// Dispatch envelopes until the process stops.
    pub async fn run(mut self, handler: Arc<dyn ResolveHandler>) {
        info!("⏱️  Resolution task worker started");
        while let Some(envelope) = self.rx.recv().await {
            let handler = handler.clone();
            let tx = self.tx.clone();
            let policy = self.policy;
            tokio::spawn(async move {
                deliver(envelope, handler, tx, policy).await;
            });
        }
    }
}

async fn deliver(
    envelope: Envelope,
    handler: Arc<dyn ResolveHandler>,
    tx: mpsc::UnboundedSender<Envelope>,
    policy: RetryPolicy,
) {
    tokio::time::sleep_until(envelope.due).await;

    let Envelope { task, attempt, .. } = envelope;
    // Deferrals do not count against the failure budget.
    let (wait, next_attempt) = match handler.deliver(&task).await {
        Delivery::Done => {
            debug!(user_id = %task.user_id, guess_id = %task.guess_id, attempt, "task delivered");
            return;
        }
        Delivery::RetryAfter(wait) => {
            debug!(
                user_id = %task.user_id,
                guess_id = %task.guess_id,
                wait_ms = wait.as_millis() as u64,
                "task deferred"
            );
            (wait, attempt)
        }
        Delivery::Failed(reason) => {
            warn!(
                user_id = %task.user_id,
                guess_id = %task.guess_id,
                attempt,
                reason = %reason,
                "task delivery failed"
            );
            if attempt >= policy.max_attempts {
                error!(
                    user_id = %task.user_id,
                    guess_id = %task.guess_id,
                    attempts = attempt,
                    "giving up on resolution task"
                );
                return;
            }
            (policy.backoff(attempt), attempt + 1)
        }
    };

    let user_id = task.user_id.clone();
    let guess_id = task.guess_id.clone();
    let redelivery = Envelope {
        task,
        due: Instant::now() + wait,
        attempt: next_attempt,
    };
    if tx.send(redelivery).is_err() {
        error!(%user_id, %guess_id, "task queue closed, redelivery dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted outcomes and records every delivery.
    struct ScriptedHandler {
        script: Mutex<VecDeque<Delivery>>,
        seen: mpsc::UnboundedSender<(ResolveTask, Instant)>,
    }

    #[async_trait]
    impl ResolveHandler for ScriptedHandler {
        async fn deliver(&self, task: &ResolveTask) -> Delivery {
            let _ = self.seen.send((task.clone(), Instant::now()));
            self.script.lock().pop_front().unwrap_or(Delivery::Done)
        }
    }

    fn spawn_worker(
        policy: RetryPolicy,
        script: Vec<Delivery>,
    ) -> (TaskQueue, mpsc::UnboundedReceiver<(ResolveTask, Instant)>) {
        let (queue, worker) = task_queue(policy);
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ScriptedHandler {
            script: Mutex::new(script.into()),
            seen: seen_tx,
        });
        tokio::spawn(worker.run(handler));
        (queue, seen_rx)
    }

    async fn next_delivery(
        rx: &mut mpsc::UnboundedReceiver<(ResolveTask, Instant)>,
    ) -> Option<(ResolveTask, Instant)> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(20), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_delivers_no_earlier_than_delay() {
        let (queue, mut seen) = spawn_worker(RetryPolicy::default(), vec![]);

        let start = Instant::now();
        queue
            .schedule(ResolveTask::new("alice", "guess_1"), Duration::from_millis(50))
            .await
            .unwrap();

        let (task, at) = next_delivery(&mut seen).await.expect("delivery");
        assert_eq!(task, ResolveTask::new("alice", "guess_1"));
        assert!(at.duration_since(start) >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried_until_done() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(5),
        };
        let script = vec![
            Delivery::Failed("store down".to_string()),
            Delivery::RetryAfter(Duration::from_millis(5)),
            Delivery::Done,
        ];
        let (queue, mut seen) = spawn_worker(policy, script);

        queue
            .schedule(ResolveTask::new("bob", "guess_2"), Duration::ZERO)
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(next_delivery(&mut seen).await.is_some());
        }
        let extra = tokio::time::timeout(Duration::from_millis(100), seen.recv()).await;
        assert!(extra.is_err(), "no delivery after Done");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
        };
        let script = vec![
            Delivery::Failed("boom".to_string()),
            Delivery::Failed("boom".to_string()),
            Delivery::Failed("boom".to_string()),
        ];
        let (queue, mut seen) = spawn_worker(policy, script);

        queue
            .schedule(ResolveTask::new("carol", "guess_3"), Duration::ZERO)
            .await
            .unwrap();

        assert!(next_delivery(&mut seen).await.is_some());
        assert!(next_delivery(&mut seen).await.is_some());
        let extra = tokio::time::timeout(Duration::from_millis(100), seen.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_deferrals_do_not_spend_attempts() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_backoff: Duration::from_millis(1),
        };
        let mut script: Vec<Delivery> = (0..4)
            .map(|_| Delivery::RetryAfter(Duration::from_millis(2)))
            .collect();
        script.push(Delivery::Done);
        let (queue, mut seen) = spawn_worker(policy, script);

        queue
            .schedule(ResolveTask::new("erin", "guess_5"), Duration::ZERO)
            .await
            .unwrap();

        for _ in 0..5 {
            assert!(next_delivery(&mut seen).await.is_some());
        }
        let extra = tokio::time::timeout(Duration::from_millis(100), seen.recv()).await;
        assert!(extra.is_err(), "no delivery after Done");
    }

    #[tokio::test]
    async fn test_deferral_keeps_failure_budget() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
        };
        let script = vec![
            Delivery::Failed("boom".to_string()),
            Delivery::RetryAfter(Duration::from_millis(1)),
            Delivery::RetryAfter(Duration::from_millis(1)),
            Delivery::Failed("boom".to_string()),
            Delivery::Failed("boom".to_string()),
        ];
        let (queue, mut seen) = spawn_worker(policy, script);

        queue
            .schedule(ResolveTask::new("fred", "guess_6"), Duration::ZERO)
            .await
            .unwrap();

        for _ in 0..4 {
            assert!(next_delivery(&mut seen).await.is_some());
        }
        let extra = tokio::time::timeout(Duration::from_millis(100), seen.recv()).await;
        assert!(extra.is_err(), "second failure exhausts the budget");
    }

    #[tokio::test]
    async fn test_schedule_fails_when_worker_dropped() {
        let (queue, worker) = task_queue(RetryPolicy::default());
        drop(worker);

        let err = queue
            .schedule(ResolveTask::new("dave", "guess_4"), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, SchedulingError::QueueClosed);
    }
}
