use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{Queue, QueueContext};
use crate::config::ConnectionConfig;
use crate::error::QueueResult;
use crate::job::{fire_handler, run_failed_hook, Job, JobState};
use crate::types::{Delay, Payload};

/// In-process queue backend for tests and single-process deployments
///
/// Messages live in per-queue FIFO deques plus a delayed set that is
/// migrated on every pop. A popped message leaves the backend immediately:
/// `release` is the only redelivery path, since an in-process queue has no
/// visibility lease to fall back on.
pub struct MemoryQueue {
    context: QueueContext,
    default_queue: String,
    state: Arc<MemoryState>,
}

#[derive(Debug, Clone)]
struct MemoryMessage {
    id: Uuid,
    raw: String,
    attempts: u32,
}

impl MemoryMessage {
    fn new(raw: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw,
            attempts: 0,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    /// queue name -> ready messages, FIFO
    ready: RwLock<HashMap<String, VecDeque<MemoryMessage>>>,

    /// Messages not yet visible: (available_at, queue, message)
    delayed: RwLock<Vec<(DateTime<Utc>, String, MemoryMessage)>>,
}

impl MemoryState {
    fn push_ready(&self, queue: &str, message: MemoryMessage) {
        self.ready
            .write()
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    fn push_delayed(&self, queue: &str, available_at: DateTime<Utc>, message: MemoryMessage) {
        self.delayed
            .write()
            .push((available_at, queue.to_string(), message));
    }

    /// Move due delayed messages for `queue` into its ready deque
    fn migrate_due(&self, queue: &str, now: DateTime<Utc>) {
        let mut delayed = self.delayed.write();

        let mut due: Vec<(DateTime<Utc>, MemoryMessage)> = Vec::new();
        delayed.retain(|(available_at, name, message)| {
            if name == queue && *available_at <= now {
                due.push((*available_at, message.clone()));
                false
            } else {
                true
            }
        });

        if due.is_empty() {
            return;
        }

        due.sort_by_key(|(available_at, _)| *available_at);

        let mut ready = self.ready.write();
        let queue = ready.entry(queue.to_string()).or_default();
        for (_, message) in due {
            queue.push_back(message);
        }
    }

    fn pop_ready(&self, queue: &str) -> Option<MemoryMessage> {
        self.ready.write().get_mut(queue).and_then(VecDeque::pop_front)
    }
}

impl MemoryQueue {
    pub fn new(config: &ConnectionConfig, context: QueueContext) -> Self {
        Self {
            context,
            default_queue: config.queue.clone(),
            state: Arc::new(MemoryState::default()),
        }
    }

    fn queue_name<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }

    /// Number of visible messages on a queue
    pub fn size(&self, queue: Option<&str>) -> usize {
        let queue = self.queue_name(queue);
        self.state.migrate_due(queue, Utc::now());

        self.state
            .ready
            .read()
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Number of messages waiting on a delay
    pub fn delayed_size(&self, queue: Option<&str>) -> usize {
        let queue = self.queue_name(queue);

        self.state
            .delayed
            .read()
            .iter()
            .filter(|(_, name, _)| name == queue)
            .count()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, job: &str, data: Value, queue: Option<&str>) -> QueueResult<()> {
        let raw = Payload::create(job, data)?;
        let queue = self.queue_name(queue);
        debug!(handler = job, queue, "pushed job onto memory queue");

        self.state.push_ready(queue, MemoryMessage::new(raw));
        Ok(())
    }

    async fn later(
        &self,
        delay: Delay,
        job: &str,
        data: Value,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        let raw = Payload::create(job, data)?;
        let queue = self.queue_name(queue);
        let now = Utc::now();

        if delay.is_elapsed(now) {
            self.state.push_ready(queue, MemoryMessage::new(raw));
        } else {
            self.state
                .push_delayed(queue, delay.available_at(now), MemoryMessage::new(raw));
        }

        Ok(())
    }

    async fn pop(&self, queue: Option<&str>) -> QueueResult<Option<Box<dyn Job>>> {
        let queue = self.queue_name(queue);
        self.state.migrate_due(queue, Utc::now());

        let Some(mut message) = self.state.pop_ready(queue) else {
            return Ok(None);
        };

        message.attempts += 1;

        Ok(Some(Box::new(MemoryJob {
            id: message.id,
            queue: queue.to_string(),
            raw: message.raw,
            state: JobState::new(message.attempts),
            backend: Arc::clone(&self.state),
            context: self.context.clone(),
        })))
    }
}

/// Handle around one message popped from a [`MemoryQueue`]
struct MemoryJob {
    id: Uuid,
    queue: String,
    raw: String,
    state: JobState,
    backend: Arc<MemoryState>,
    context: QueueContext,
}

#[async_trait]
impl Job for MemoryJob {
    async fn fire(&mut self) -> Result<(), crate::error::JobError> {
        let handlers = Arc::clone(&self.context.handlers);
        fire_handler(&handlers, self).await
    }

    async fn delete(&mut self) -> QueueResult<()> {
        // Popping already removed the message; deleting only marks the
        // delivery terminal.
        self.state.try_delete();
        Ok(())
    }

    async fn release(&mut self, delay: Delay) -> QueueResult<()> {
        if self.state.try_release()? {
            let message = MemoryMessage {
                id: self.id,
                raw: self.raw.clone(),
                attempts: self.state.attempts(),
            };
            let now = Utc::now();

            if delay.is_elapsed(now) {
                self.backend.push_ready(&self.queue, message);
            } else {
                self.backend
                    .push_delayed(&self.queue, delay.available_at(now), message);
            }
        }

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
        let handlers = Arc::clone(&self.context.handlers);
        run_failed_hook(&handlers, &mut *self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::HandlerRegistry;
    use serde_json::json;

    fn memory_queue() -> MemoryQueue {
        MemoryQueue::new(
            &ConnectionConfig::new("memory"),
            QueueContext::new(Arc::new(HandlerRegistry::new())),
        )
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = memory_queue();

        queue.push("jobs.first", json!({}), None).await.unwrap();
        queue.push("jobs.second", json!({}), None).await.unwrap();

        let first = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(Payload::decode(first.raw_body()).unwrap().job, "jobs.first");
        assert_eq!(first.attempts(), 1);

        let second = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(
            Payload::decode(second.raw_body()).unwrap().job,
            "jobs.second"
        );
    }

    #[tokio::test]
    async fn empty_pop_returns_none() {
        let queue = memory_queue();

        assert!(queue.pop(None).await.unwrap().is_none());
        assert!(queue.pop(Some("other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_jobs_stay_hidden_until_due() {
        let queue = memory_queue();

        queue
            .later(Delay::Seconds(3600), "jobs.slow", json!({}), None)
            .await
            .unwrap();

        assert!(queue.pop(None).await.unwrap().is_none());
        assert_eq!(queue.delayed_size(None), 1);

        queue
            .later(Delay::Seconds(0), "jobs.fast", json!({}), None)
            .await
            .unwrap();

        let job = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(Payload::decode(job.raw_body()).unwrap().job, "jobs.fast");
    }

    #[tokio::test]
    async fn release_requeues_and_the_next_pop_counts_a_new_attempt() {
        let queue = memory_queue();
        queue.push("jobs.retry", json!({}), None).await.unwrap();

        let mut job = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(job.attempts(), 1);

        job.release(Delay::none()).await.unwrap();
        assert!(job.is_released());
        assert_eq!(queue.size(None), 1);

        let redelivered = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(redelivered.attempts(), 2);
    }

    #[tokio::test]
    async fn queues_are_isolated_by_name() {
        let queue = memory_queue();

        queue
            .push_on("high", "jobs.urgent", json!({}))
            .await
            .unwrap();

        assert!(queue.pop(None).await.unwrap().is_none());
        assert!(queue.pop(Some("high")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bulk_pushes_every_job() {
        let queue = memory_queue();

        queue
            .bulk(&["jobs.a", "jobs.b", "jobs.c"], json!({"shared": true}), None)
            .await
            .unwrap();

        assert_eq!(queue.size(None), 3);
    }
}
