//! statlane-queue: actions and the single-lane queue that runs them.
//!
//! Every outbound data operation is wrapped in an [`Action`] and pushed onto
//! an [`ActionQueue`]. The queue executes exactly one action at a time, which
//! is the only throttle in front of the rate-limit-sensitive portal and the
//! only guard against overlapping store transactions.
//!
//! # Architecture
//!
//! ```text
//! ActionQueue
//!   ├── pending: VecDeque<Action>   add_to_queue → back, insert_to_queue → front
//!   ├── in_flight: Option<ActionInfo>
//!   ├── failed: bounded history of FailedAction
//!   └── drain task (spawned on demand, one at a time)
//!         └── Action::execute(processor)
//!               Pending → TimedOut | Completed | CompletedPendingMinDelay → Settled
//! ```

pub mod action;
pub mod error;
pub mod queue;

pub use action::{Action, ActionId, ActionInfo, ActionProcessor, ActionSettings, ProcessFuture};
pub use error::{ActionError, ActionResult};
pub use queue::{ActionQueue, ActionTicket, FailedAction};
