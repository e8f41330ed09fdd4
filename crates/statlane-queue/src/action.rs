//! A single unit of queued work and its execution state machine.
//!
//! Execution races the processing future against the timeout budget. When
//! processing finishes first the action still waits out its minimum duration
//! before settling, so callers never see a result sooner than that.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::debug;

use statlane_core::config::QueueConfig;
use statlane_core::{ActionKind, ActionOutput, AppId};

use crate::error::{ActionError, ActionResult};

/// Future returned by [`ActionProcessor::process`].
pub type ProcessFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<ActionOutput>> + Send + 'a>>;

/// Performs the actual work for an action.
///
/// The queue owns exactly one processor and hands it every action in turn.
/// Dropping the returned future must cancel the work.
pub trait ActionProcessor: Send + Sync {
    fn process<'a>(&'a self, action: &'a Action) -> ProcessFuture<'a>;
}

/// Timing budget for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSettings {
    /// Upper bound on processing time.
    pub execute_timeout: Duration,
    /// Lower bound on time until the action settles.
    pub minimal_execution_time: Duration,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            execute_timeout: Duration::from_secs(20),
            minimal_execution_time: Duration::ZERO,
        }
    }
}

impl ActionSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            execute_timeout: Duration::from_secs(config.execute_timeout_secs),
            minimal_execution_time: Duration::from_millis(config.minimal_execution_time_ms),
        }
    }
}

/// Process-unique action identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ActionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of an action used for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInfo {
    pub id: ActionId,
    pub app_id: AppId,
    pub action_type: String,
}

#[derive(Debug, Clone)]
pub struct Action {
    id: ActionId,
    app_id: AppId,
    kind: ActionKind,
    settings: ActionSettings,
}

impl Action {
    pub fn new(app_id: AppId, kind: ActionKind) -> Self {
        Self {
            id: ActionId::next(),
            app_id,
            kind,
            settings: ActionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ActionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn settings(&self) -> ActionSettings {
        self.settings
    }

    pub fn action_type(&self) -> String {
        self.kind.type_name()
    }

    pub fn info(&self) -> ActionInfo {
        ActionInfo {
            id: self.id,
            app_id: self.app_id.clone(),
            action_type: self.action_type(),
        }
    }

    /// Run the action through `processor` and settle it.
    ///
    /// Settles with the processor's outcome no earlier than
    /// `minimal_execution_time` after the start, or with
    /// [`ActionError::Timeout`] once `execute_timeout` elapses first. A
    /// timed-out processing future is dropped, which cancels it.
    pub async fn execute(&self, processor: &dyn ActionProcessor) -> ActionResult {
        let started = Instant::now();
        let deadline = started + self.settings.execute_timeout;
        let earliest = started + self.settings.minimal_execution_time;

        let mut process = processor.process(self);
        let mut state = ExecutionState::Pending;
        loop {
            state = match state {
                ExecutionState::Pending => tokio::select! {
                    biased;
                    outcome = &mut process => ExecutionState::processed(outcome, earliest),
                    _ = sleep_until(deadline) => ExecutionState::TimedOut,
                },
                ExecutionState::CompletedPendingMinDelay(outcome) => {
                    sleep_until(earliest).await;
                    ExecutionState::Completed(outcome)
                }
                ExecutionState::Completed(outcome) => {
                    ExecutionState::Settled(outcome.map_err(|source| ActionError::Failed {
                        action_type: self.action_type(),
                        source,
                    }))
                }
                ExecutionState::TimedOut => ExecutionState::Settled(Err(ActionError::Timeout {
                    action_type: self.action_type(),
                    after: self.settings.execute_timeout,
                })),
                ExecutionState::Settled(result) => {
                    debug!(
                        action = %self.id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ok = result.is_ok(),
                        "action settled"
                    );
                    return result;
                }
            };
        }
    }
}

/// Where an executing action stands.
enum ExecutionState {
    /// Processing and the timeout are racing.
    Pending,
    /// Processing finished before the minimum duration.
    CompletedPendingMinDelay(anyhow::Result<ActionOutput>),
    /// Processing finished and the minimum duration has passed.
    Completed(anyhow::Result<ActionOutput>),
    TimedOut,
    Settled(ActionResult),
}

impl ExecutionState {
    fn processed(outcome: anyhow::Result<ActionOutput>, earliest: Instant) -> Self {
        if Instant::now() < earliest {
            ExecutionState::CompletedPendingMinDelay(outcome)
        } else {
            ExecutionState::Completed(outcome)
        }
    }
}
