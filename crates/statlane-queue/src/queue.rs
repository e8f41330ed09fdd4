//! Single-lane action queue.
//!
//! Actions run strictly one at a time in queue order. A drain task is
//! spawned when work arrives on an idle queue and exits once the queue is
//! empty again, so there is never more than one of them. A processor that
//! panics fails its own action; the lane keeps going.

use std::collections::VecDeque;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info, info_span, warn};

use statlane_core::AppId;

use crate::action::{Action, ActionId, ActionInfo, ActionProcessor};
use crate::error::{ActionError, ActionResult};

const DEFAULT_FAILED_HISTORY: usize = 100;

/// An action that settled with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAction {
    pub info: ActionInfo,
    pub error: String,
    pub timed_out: bool,
    /// Unix seconds at which the action settled.
    pub failed_at: u64,
}

struct Entry {
    action: Action,
    reply: oneshot::Sender<ActionResult>,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<Entry>,
    in_flight: Option<ActionInfo>,
    failed: VecDeque<FailedAction>,
    draining: bool,
}

/// FIFO queue that executes actions one at a time through a single processor.
///
/// Cloning is cheap; clones share the same lane.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<Mutex<QueueInner>>,
    processor: Arc<dyn ActionProcessor>,
    failed_history: usize,
}

impl ActionQueue {
    pub fn new(processor: Arc<dyn ActionProcessor>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            processor,
            failed_history: DEFAULT_FAILED_HISTORY,
        }
    }

    /// Bound the failed-action history. Oldest entries are evicted first.
    pub fn with_failed_history(mut self, limit: usize) -> Self {
        self.failed_history = limit;
        self
    }

    /// Append `action` to the back of the queue.
    ///
    /// Must be called from within a Tokio runtime. The returned ticket
    /// resolves with the action's result once it settles.
    pub fn add_to_queue(&self, action: Action) -> ActionTicket {
        self.enqueue(action, false)
    }

    /// Put `action` at the front of the queue, ahead of everything pending.
    /// An action already executing is not interrupted.
    pub fn insert_to_queue(&self, action: Action) -> ActionTicket {
        self.enqueue(action, true)
    }

    fn enqueue(&self, action: Action, front: bool) -> ActionTicket {
        let (reply, rx) = oneshot::channel();
        let ticket = ActionTicket {
            id: action.id(),
            action_type: action.action_type(),
            rx,
        };
        debug!(action = %ticket.id, action_type = %ticket.action_type, front, "queued");

        let start = {
            let mut inner = lock(&self.inner);
            let entry = Entry { action, reply };
            if front {
                inner.pending.push_front(entry);
            } else {
                inner.pending.push_back(entry);
            }
            !std::mem::replace(&mut inner.draining, true)
        };
        if start {
            tokio::spawn(self.clone().drain());
        }
        ticket
    }

    async fn drain(self) {
        let _guard = DrainGuard {
            inner: self.inner.clone(),
        };
        loop {
            let entry = {
                let mut inner = lock(&self.inner);
                match inner.pending.pop_front() {
                    Some(entry) => {
                        inner.in_flight = Some(entry.action.info());
                        entry
                    }
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };

            let span = info_span!(
                "action",
                action_id = %entry.action.id(),
                app_id = %entry.action.app_id(),
                action_type = %entry.action.action_type(),
            );
            let result = AssertUnwindSafe(
                entry
                    .action
                    .execute(self.processor.as_ref())
                    .instrument(span),
            )
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ActionError::Failed {
                    action_type: entry.action.action_type(),
                    source: anyhow::anyhow!("processor panicked: {}", panic_message(&*payload)),
                })
            });

            {
                let mut inner = lock(&self.inner);
                inner.in_flight = None;
                if let Err(err) = &result {
                    warn!(action = %entry.action.id(), error = %err, "action failed");
                    inner.failed.push_back(FailedAction {
                        info: entry.action.info(),
                        error: err.to_string(),
                        timed_out: err.is_timeout(),
                        failed_at: epoch_secs(),
                    });
                    while inner.failed.len() > self.failed_history {
                        inner.failed.pop_front();
                    }
                }
            }
            // The caller may have dropped its ticket.
            let _ = entry.reply.send(result);
        }
    }

    /// Pending plus in-flight actions.
    pub fn queue_length(&self) -> usize {
        let inner = lock(&self.inner);
        inner.pending.len() + usize::from(inner.in_flight.is_some())
    }

    pub fn pending_length(&self) -> usize {
        lock(&self.inner).pending.len()
    }

    pub fn in_flight(&self) -> Option<ActionInfo> {
        lock(&self.inner).in_flight.clone()
    }

    /// In-flight and pending actions with the given discriminator, in
    /// execution order.
    pub fn actions_of_type(&self, action_type: &str) -> Vec<ActionInfo> {
        self.snapshot()
            .into_iter()
            .filter(|info| info.action_type == action_type)
            .collect()
    }

    /// In-flight and pending actions bound to `app_id`, in execution order.
    pub fn actions_by_app_id(&self, app_id: &AppId) -> Vec<ActionInfo> {
        self.snapshot()
            .into_iter()
            .filter(|info| &info.app_id == app_id)
            .collect()
    }

    pub fn failed_actions(&self) -> Vec<FailedAction> {
        lock(&self.inner).failed.iter().cloned().collect()
    }

    /// Progress line for status displays, `None` when idle.
    pub fn status_text(&self) -> Option<String> {
        match self.queue_length() {
            0 => None,
            n => Some(format!("Updating stats ({n})")),
        }
    }

    /// Drop every pending action. Their tickets resolve with
    /// [`ActionError::Cancelled`]; the in-flight action runs to completion.
    pub fn clear_queue(&self) -> usize {
        let dropped: Vec<Entry> = lock(&self.inner).pending.drain(..).collect();
        if !dropped.is_empty() {
            info!(count = dropped.len(), "queue cleared");
        }
        dropped.len()
    }

    fn snapshot(&self) -> Vec<ActionInfo> {
        let inner = lock(&self.inner);
        inner
            .in_flight
            .iter()
            .cloned()
            .chain(inner.pending.iter().map(|entry| entry.action.info()))
            .collect()
    }
}

/// Resolves with the result of a queued action.
#[derive(Debug)]
pub struct ActionTicket {
    id: ActionId,
    action_type: String,
    rx: oneshot::Receiver<ActionResult>,
}

impl ActionTicket {
    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }
}

impl Future for ActionTicket {
    type Output = ActionResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ActionError::Cancelled {
                action_type: this.action_type.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Releases the lane if the drain task itself panics.
struct DrainGuard {
    inner: Arc<Mutex<QueueInner>>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut inner = lock(&self.inner);
            inner.in_flight = None;
            inner.draining = false;
        }
    }
}

fn lock(inner: &Mutex<QueueInner>) -> MutexGuard<'_, QueueInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
