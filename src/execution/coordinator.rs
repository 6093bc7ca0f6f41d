//! Fan-out/fan-in executor with pluggable success strategies
//!
//! Each invocation moves through `Idle -> Submitted -> (AllCompleted | TimedOut)
//! -> Joined`. The coordinator itself holds no per-invocation state and can be
//! reused.

use crate::core::{
    config::CoordinatorConfig,
    error::{CoreError, CoreResult},
    message::{is_truthy, Message},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Decides whether task failures fail the whole join
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExceptionStrategy {
    /// Any failure fails the join with the first captured error
    #[default]
    FirstFailure,
    /// Failures never fail the join
    IgnoreFailures,
    /// Failures are suppressed if at least one completed message carries a
    /// truthy value under `key`
    MetadataFlag { key: String },
}

/// Outcome of applying an [`ExceptionStrategy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Suppress,
    Propagate,
}

impl ExceptionStrategy {
    pub fn validate(&self, component: &str) -> CoreResult<()> {
        if let ExceptionStrategy::MetadataFlag { key } = self {
            if key.trim().is_empty() {
                return Err(CoreError::configuration(component, "metadata flag key must not be empty"));
            }
        }
        Ok(())
    }

    pub fn decide(&self, result: &JoinResult) -> Verdict {
        match self {
            ExceptionStrategy::FirstFailure => Verdict::Propagate,
            ExceptionStrategy::IgnoreFailures => Verdict::Suppress,
            ExceptionStrategy::MetadataFlag { key } => {
                let flagged = result
                    .completed()
                    .filter(|m| m.metadata(key).is_some_and(is_truthy))
                    .count();
                if flagged > 0 {
                    Verdict::Suppress
                } else {
                    Verdict::Propagate
                }
            }
        }
    }
}

/// Where an invocation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    Idle,
    Submitted,
    AllCompleted,
    TimedOut,
    Joined,
}

/// Result of one sub-task
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(Message),
    Failed(CoreError),
    /// Not finished when the join deadline passed
    Cancelled,
}

/// Every outcome of an invocation, in submission order
#[derive(Debug)]
pub struct JoinResult {
    outcomes: Vec<TaskOutcome>,
    phase: JoinPhase,
}

impl JoinResult {
    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn completed(&self) -> impl Iterator<Item = &Message> {
        self.outcomes.iter().filter_map(|o| match o {
            TaskOutcome::Completed(m) => Some(m),
            _ => None,
        })
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Failed(_)))
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Cancelled))
            .count()
    }

    /// Completed messages in submission order
    pub fn into_messages(self) -> Vec<Message> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                TaskOutcome::Completed(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

/// Runs message tasks on a bounded pool and joins them
#[derive(Debug)]
pub struct ParallelExecutionCoordinator {
    name: String,
    permits: Arc<Semaphore>,
    max_workers: usize,
    timeout: Option<Duration>,
    strategy: ExceptionStrategy,
}

impl ParallelExecutionCoordinator {
    pub fn new(
        name: impl Into<String>,
        config: &CoordinatorConfig,
        strategy: ExceptionStrategy,
    ) -> CoreResult<Self> {
        let name = name.into();
        config.validate(&name)?;
        strategy.validate(&name)?;
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_workers)),
            max_workers: config.max_workers,
            timeout: config.timeout(),
            strategy,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn strategy(&self) -> &ExceptionStrategy {
        &self.strategy
    }

    /// Wait until no task of any earlier invocation is still running
    pub async fn quiesce(&self) {
        match self.permits.acquire_many(self.max_workers as u32).await {
            Ok(_all) => debug!(coordinator = %self.name, "all workers idle"),
            Err(e) => warn!(coordinator = %self.name, error = %e, "worker pool closed"),
        }
    }

    /// Submit one task per input and wait up to `timeout` for all of them.
    ///
    /// Tasks still running at the deadline are marked cancelled: tasks that
    /// have not started yet never start, tasks already running are left to
    /// finish on their own and their late result is discarded.
    pub async fn run_all<F, Fut>(
        &self,
        inputs: Vec<Message>,
        timeout: Option<Duration>,
        work: F,
    ) -> JoinResult
    where
        F: Fn(Message) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<Message>> + Send + 'static,
    {
        let total = inputs.len();
        let cancelled = Arc::new(AtomicBool::new(false));
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut phase = JoinPhase::Idle;

        let mut handles = Vec::with_capacity(total);
        for msg in inputs {
            let permits = self.permits.clone();
            let cancelled = cancelled.clone();
            let work = work.clone();
            let name = self.name.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| CoreError::processing(&name, e))?;
                if cancelled.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                work(msg).await.map(Some)
            }));
        }
        phase = next_phase(&self.name, phase, JoinPhase::Submitted);

        let mut outcomes = Vec::with_capacity(total);
        for handle in handles {
            let joined = match deadline {
                Some(deadline) if !cancelled.load(Ordering::SeqCst) => {
                    match tokio::time::timeout_at(deadline, handle).await {
                        Ok(joined) => Some(joined),
                        Err(_) => {
                            cancelled.store(true, Ordering::SeqCst);
                            None
                        }
                    }
                }
                // past the deadline: only collect what has already finished
                Some(_) => {
                    if handle.is_finished() {
                        Some(handle.await)
                    } else {
                        None
                    }
                }
                None => Some(handle.await),
            };

            outcomes.push(match joined {
                Some(Ok(Ok(Some(msg)))) => TaskOutcome::Completed(msg),
                Some(Ok(Ok(None))) => TaskOutcome::Cancelled,
                Some(Ok(Err(e))) => TaskOutcome::Failed(e),
                Some(Err(join_err)) => TaskOutcome::Failed(CoreError::processing(&self.name, join_err)),
                None => TaskOutcome::Cancelled,
            });
        }

        let finished = if cancelled.load(Ordering::SeqCst) {
            JoinPhase::TimedOut
        } else {
            JoinPhase::AllCompleted
        };
        phase = next_phase(&self.name, phase, finished);

        JoinResult { outcomes, phase }
    }

    /// Apply timeout handling and the exception strategy to a finished run.
    ///
    /// Cancelled tasks always produce a timeout error, whatever the strategy
    /// decides about real failures.
    pub fn join(&self, mut result: JoinResult) -> CoreResult<JoinResult> {
        let total = result.len();
        let timed_out = result.cancelled_count();
        result.phase = next_phase(&self.name, result.phase, JoinPhase::Joined);

        if timed_out > 0 {
            warn!(coordinator = %self.name, timed_out, total, "join timed out");
            return Err(CoreError::Timeout {
                component: self.name.clone(),
                timed_out,
                total,
            });
        }

        let failures = result.failure_count();
        if failures == 0 {
            return Ok(result);
        }

        match self.strategy.decide(&result) {
            Verdict::Suppress => {
                info!(coordinator = %self.name, failures, total, "suppressing task failures");
                Ok(result)
            }
            Verdict::Propagate => {
                let first = result.outcomes.into_iter().find_map(|o| match o {
                    TaskOutcome::Failed(e) => Some(e),
                    _ => None,
                });
                match first {
                    Some(e) => Err(e),
                    None => Err(CoreError::processing(&self.name, "task failure without cause")),
                }
            }
        }
    }

    /// `run_all` with the configured timeout followed by `join`
    pub async fn execute<F, Fut>(&self, inputs: Vec<Message>, work: F) -> CoreResult<JoinResult>
    where
        F: Fn(Message) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<Message>> + Send + 'static,
    {
        let result = self.run_all(inputs, self.timeout, work).await;
        self.join(result)
    }
}

fn next_phase(name: &str, from: JoinPhase, to: JoinPhase) -> JoinPhase {
    debug!(coordinator = %name, ?from, ?to, "join phase");
    to
}
