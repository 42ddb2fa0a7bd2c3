use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::backend::{Queue, QueueContext};
use crate::config::ConnectionConfig;
use crate::error::{QueueResult, QueueError};
use crate::job::{fire_handler, run_failed_hook, Job, JobState};
use crate::types::{Delay, Payload};

/// In-process synchronous driver
///
/// `push` fires the handler inline on the producer's task; there is no
/// stored queue, so `pop` never yields a job. Delays are ignored.
pub struct SyncQueue {
    context: QueueContext,
    default_queue: String,
}

impl SyncQueue {
    pub fn new(config: &ConnectionConfig, context: QueueContext) -> Self {
        Self {
            context,
            default_queue: config.queue.clone(),
        }
    }

    fn queue_name<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }
}

#[async_trait]
impl Queue for SyncQueue {
    async fn push(&self, job: &str, data: Value, queue: Option<&str>) -> QueueResult<()> {
        let raw = Payload::create(job, data)?;
        let queue = self.queue_name(queue);
        debug!(handler = job, queue, "firing sync job inline");

        let mut job = SyncJob {
            queue: queue.to_string(),
            raw,
            state: JobState::new(1),
            context: self.context.clone(),
        };

        match job.fire().await {
            Ok(()) => Ok(()),
            Err(error) => {
                job.failed().await;
                Err(QueueError::Handler(error))
            }
        }
    }

    async fn later(
        &self,
        _delay: Delay,
        job: &str,
        data: Value,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        self.push(job, data, queue).await
    }

    async fn pop(&self, _queue: Option<&str>) -> QueueResult<Option<Box<dyn Job>>> {
        Ok(None)
    }
}

struct SyncJob {
    queue: String,
    raw: String,
    state: JobState,
    context: QueueContext,
}

#[async_trait]
impl Job for SyncJob {
    async fn fire(&mut self) -> Result<(), crate::error::JobError> {
        let handlers = std::sync::Arc::clone(&self.context.handlers);
        fire_handler(&handlers, self).await
    }

    async fn delete(&mut self) -> QueueResult<()> {
        self.state.try_delete();
        Ok(())
    }

    async fn release(&mut self, _delay: Delay) -> QueueResult<()> {
        self.state.try_release()?;
        Ok(())
    }

    fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    fn is_released(&self) -> bool {
        self.state.is_released()
    }

    fn attempts(&self) -> u32 {
        self.state.attempts()
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn raw_body(&self) -> &str {
        &self.raw
    }

    async fn failed(&mut self) {
        let handlers = std::sync::Arc::clone(&self.context.handlers);
        run_failed_hook(&handlers, &mut *self).await;
    }
}
