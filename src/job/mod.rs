pub mod registry;

pub use registry::{HandlerRegistry, JobHandler};

use async_trait::async_trait;

use crate::error::{JobError, QueueError, QueueResult};
use crate::types::{Delay, Payload};

/// Backend handle for one dequeued message
///
/// A job is created when a backend's `pop` dequeues a message and is mutated
/// only by the worker and by handler code. `delete` and `release` are
/// mutually exclusive; once either succeeds the job is terminal for this
/// delivery. If neither is called, redelivery is governed by the backend's
/// own visibility mechanism, outside this crate's control.
#[async_trait]
pub trait Job: Send {
    /// Resolve the payload's handler and invoke it
    async fn fire(&mut self) -> Result<(), JobError>;

    /// Remove the message from the backend. Idempotent.
    async fn delete(&mut self) -> QueueResult<()>;

    /// Return the message to the backend with a new visibility delay.
    ///
    /// Invalid after `delete`.
    async fn release(&mut self, delay: Delay) -> QueueResult<()>;

    /// Whether `delete` has been called on this delivery
    fn is_deleted(&self) -> bool;

    /// Whether `release` has been called on this delivery
    fn is_released(&self) -> bool;

    /// Whether this delivery reached a terminal state
    fn is_deleted_or_released(&self) -> bool {
        self.is_deleted() || self.is_released()
    }

    /// Delivery count as tracked by the backend.
    ///
    /// Incremented on every dequeue: the first delivery observes `1`, and a
    /// released job counts again when it is redelivered.
    fn attempts(&self) -> u32;

    /// Name of the queue the message was popped from
    fn queue(&self) -> &str;

    /// Undecoded payload string, for event and failure logging
    fn raw_body(&self) -> &str;

    /// Run handler-specific cleanup once the job is declared permanently
    /// failed
    async fn failed(&mut self);
}

/// Transient per-delivery state shared by backend job implementations
#[derive(Debug, Clone, Default)]
pub struct JobState {
    attempts: u32,
    deleted: bool,
    released: bool,
}

impl JobState {
    /// Create state for a delivery with the given attempt count
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            deleted: false,
            released: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_terminal(&self) -> bool {
        self.deleted || self.released
    }

    /// Transition to deleted. Returns `true` only on the first effective
    /// call; a terminal delivery is left untouched.
    pub fn try_delete(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.deleted = true;
        true
    }

    /// Transition to released. Errors after `delete`; returns `false` when
    /// already released.
    pub fn try_release(&mut self) -> QueueResult<bool> {
        if self.deleted {
            return Err(QueueError::JobDeleted);
        }

        if self.released {
            return Ok(false);
        }

        self.released = true;
        Ok(true)
    }
}

/// Decode the job's payload, resolve its handler, and invoke it
pub(crate) async fn fire_handler(
    handlers: &HandlerRegistry,
    job: &mut dyn Job,
) -> Result<(), JobError> {
    let payload =
        Payload::decode(job.raw_body()).map_err(|err| JobError::Payload(err.to_string()))?;
    let handler = handlers.resolve(&payload.job)?;

    handler.handle(job, payload.data).await
}

/// Run the handler's failed hook for a permanently failed job
pub(crate) async fn run_failed_hook(handlers: &HandlerRegistry, job: &mut dyn Job) {
    if let Ok(payload) = Payload::decode(job.raw_body()) {
        if let Ok(handler) = handlers.resolve(&payload.job) {
            handler.failed(&payload.data).await;
        }
    }
}
