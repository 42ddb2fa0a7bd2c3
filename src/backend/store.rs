use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{Queue, QueueContext};
use crate::config::ConnectionConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{fire_handler, run_failed_hook, Job, JobState};
use crate::types::{Delay, Payload};

const DEFAULT_PREFIX: &str = "queues";
const DEFAULT_VISIBILITY_TIMEOUT: u64 = 60;

/// Key/value + list store contract satisfied by an external database layer
///
/// The store driver needs plain FIFO lists for ready messages and
/// time-scored sets for delayed and reserved ones. Implementations decide
/// durability and connection handling; errors surface as [`QueueError`] and
/// are treated by the worker as "no job this tick".
pub trait ListStore: Send + Sync {
    /// Append a value to the tail of a list
    fn push_back(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Pop a value from the head of a list
    fn pop_front(&self, key: &str) -> QueueResult<Option<String>>;

    /// Add a value to a time-scored set
    fn add_scheduled(&self, key: &str, score: i64, value: &str) -> QueueResult<()>;

    /// Remove and return every value scored at or below `cutoff`, in score
    /// order
    fn take_due(&self, key: &str, cutoff: i64) -> QueueResult<Vec<String>>;

    /// Remove a specific value from a time-scored set; `true` if it was
    /// present
    fn remove_scheduled(&self, key: &str, value: &str) -> QueueResult<bool>;
}

/// Stored wire record wrapping the payload with backend bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    id: Uuid,
    payload: String,
    attempts: u32,
}

impl StoredMessage {
    fn new(payload: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempts: 0,
        }
    }
}

/// Database-backed driver over an external [`ListStore`]
///
/// Each queue uses three keys: a ready list, a `:delayed` set scored by
/// availability time, and a `:reserved` set scored by visibility expiry.
/// `pop` migrates due delayed entries and expired reservations back into the
/// ready list before dequeuing, so abandoned deliveries are redelivered once
/// their visibility timeout lapses.
pub struct StoreQueue {
    store: Arc<dyn ListStore>,
    context: QueueContext,
    default_queue: String,
    prefix: String,
    visibility_timeout: u64,
}

impl StoreQueue {
    pub fn new(store: Arc<dyn ListStore>, config: &ConnectionConfig, context: QueueContext) -> Self {
        Self {
            store,
            context,
            default_queue: config.queue.clone(),
            prefix: config
                .prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            visibility_timeout: config
                .visibility_timeout
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT),
        }
    }

    fn queue_name<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }

    fn ready_key(&self, queue: &str) -> String {
        format!("{}:{}", self.prefix, queue)
    }

    fn delayed_key(&self, queue: &str) -> String {
        format!("{}:{}:delayed", self.prefix, queue)
    }

    fn reserved_key(&self, queue: &str) -> String {
        format!("{}:{}:reserved", self.prefix, queue)
    }

    /// Move due delayed entries and expired reservations into the ready list
    fn migrate(&self, queue: &str, now: i64) -> QueueResult<()> {
        let ready = self.ready_key(queue);

        for entry in self.store.take_due(&self.delayed_key(queue), now)? {
            self.store.push_back(&ready, &entry)?;
        }

        let expired = self.store.take_due(&self.reserved_key(queue), now)?;
        if !expired.is_empty() {
            debug!(queue, count = expired.len(), "reclaiming expired reservations");
        }
        for entry in expired {
            self.store.push_back(&ready, &entry)?;
        }

        Ok(())
    }

    fn push_record(&self, queue: &str, record: &StoredMessage, delay: Delay) -> QueueResult<()> {
        let raw = serde_json::to_string(record)?;
        let now = Utc::now();

        if delay.is_elapsed(now) {
            self.store.push_back(&self.ready_key(queue), &raw)
        } else {
            self.store
                .add_scheduled(&self.delayed_key(queue), delay.available_at(now).timestamp(), &raw)
        }
    }
}

#[async_trait]
impl Queue for StoreQueue {
    async fn push(&self, job: &str, data: Value, queue: Option<&str>) -> QueueResult<()> {
        let payload = Payload::create(job, data)?;
        let queue = self.queue_name(queue);
        debug!(handler = job, queue, "pushed job onto store queue");

        self.push_record(queue, &StoredMessage::new(payload), Delay::none())
    }

    async fn later(
        &self,
        delay: Delay,
        job: &str,
        data: Value,
        queue: Option<&str>,
    ) -> QueueResult<()> {
        let payload = Payload::create(job, data)?;
        let queue = self.queue_name(queue);

        self.push_record(queue, &StoredMessage::new(payload), delay)
    }

    async fn pop(&self, queue: Option<&str>) -> QueueResult<Option<Box<dyn Job>>> {
        let queue = self.queue_name(queue);
        let now = Utc::now().timestamp();

        self.migrate(queue, now)?;

        let Some(raw_record) = self.store.pop_front(&self.ready_key(queue))? else {
            return Ok(None);
        };

        let mut record: StoredMessage = serde_json::from_str(&raw_record)
            .map_err(|err| QueueError::dequeue(queue, err.to_string()))?;
        record.attempts += 1;

        // Reserve the delivery until its visibility timeout lapses.
        let reserved_entry = serde_json::to_string(&record)?;
        self.store.add_scheduled(
            &self.reserved_key(queue),
            now + self.visibility_timeout as i64,
            &reserved_entry,
        )?;

        Ok(Some(Box::new(StoreJob {
            queue: queue.to_string(),
            raw: record.payload.clone(),
            reserved_entry,
            reserved_key: self.reserved_key(queue),
            delayed_key: self.delayed_key(queue),
            state: JobState::new(record.attempts),
            store: Arc::clone(&self.store),
            context: self.context.clone(),
        })))
    }
}

/// Connector factory for registering the store driver on a manager
pub fn store_connector(
    store: Arc<dyn ListStore>,
) -> impl Fn(&ConnectionConfig, &QueueContext) -> QueueResult<Arc<dyn Queue>> + Send + Sync + 'static
{
    move |config, context| {
        let queue: Arc<dyn Queue> =
            Arc::new(StoreQueue::new(Arc::clone(&store), config, context.clone()));
        Ok(queue)
    }
}

/// Handle around one message reserved from a [`StoreQueue`]
struct StoreJob {
    queue: String,
    raw: String,
    reserved_entry: String,
    reserved_key: String,
    delayed_key: String,
    state: JobState,
    store: Arc<dyn ListStore>,
    context: QueueContext,
}

#[async_trait]
impl Job for StoreJob {
    async fn fire(&mut self) -> Result<(), crate::error::JobError> {
        let handlers = Arc::clone(&self.context.handlers);
        fire_handler(&handlers, self).await
    }

    async fn delete(&mut self) -> QueueResult<()> {
        if self.state.try_delete() {
            self.store
                .remove_scheduled(&self.reserved_key, &self.reserved_entry)?;
        }

        Ok(())
    }

    async fn release(&mut self, delay: Delay) -> QueueResult<()> {
        if self.state.try_release()? {
            self.store
                .remove_scheduled(&self.reserved_key, &self.reserved_entry)?;

            let now = Utc::now();
            let available_at = delay.available_at(now).timestamp();
            self.store
                .add_scheduled(&self.delayed_key, available_at, &self.reserved_entry)?;
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

/// In-memory [`ListStore`] stand-in for the external database layer
#[derive(Default)]
pub struct MemoryStore {
    lists: RwLock<HashMap<String, Vec<String>>>,
    scheduled: RwLock<HashMap<String, Vec<(i64, String)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListStore for MemoryStore {
    fn push_back(&self, key: &str, value: &str) -> QueueResult<()> {
        self.lists
            .write()
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    fn pop_front(&self, key: &str) -> QueueResult<Option<String>> {
        let mut lists = self.lists.write();
        let Some(list) = lists.get_mut(key) else {
            return Ok(None);
        };

        if list.is_empty() {
            Ok(None)
        } else {
            Ok(Some(list.remove(0)))
        }
    }

    fn add_scheduled(&self, key: &str, score: i64, value: &str) -> QueueResult<()> {
        self.scheduled
            .write()
            .entry(key.to_string())
            .or_default()
            .push((score, value.to_string()));
        Ok(())
    }

    fn take_due(&self, key: &str, cutoff: i64) -> QueueResult<Vec<String>> {
        let mut scheduled = self.scheduled.write();
        let Some(entries) = scheduled.get_mut(key) else {
            return Ok(Vec::new());
        };

        let mut due: Vec<(i64, String)> = Vec::new();
        entries.retain(|(score, value)| {
            if *score <= cutoff {
                due.push((*score, value.clone()));
                false
            } else {
                true
            }
        });

        due.sort_by_key(|(score, _)| *score);
        Ok(due.into_iter().map(|(_, value)| value).collect())
    }

    fn remove_scheduled(&self, key: &str, value: &str) -> QueueResult<bool> {
        let mut scheduled = self.scheduled.write();
        let Some(entries) = scheduled.get_mut(key) else {
            return Ok(false);
        };

        let before = entries.len();
        entries.retain(|(_, existing)| existing != value);
        Ok(entries.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::HandlerRegistry;
    use serde_json::json;

    fn store_queue(visibility_timeout: u64) -> StoreQueue {
        StoreQueue::new(
            Arc::new(MemoryStore::new()),
            &ConnectionConfig::new("database").with_visibility_timeout(visibility_timeout),
            QueueContext::new(Arc::new(HandlerRegistry::new())),
        )
    }

    #[tokio::test]
    async fn push_then_pop_round_trips_the_payload() {
        let queue = store_queue(60);

        queue
            .push("emails.send", json!({"to": "x@example.com"}), None)
            .await
            .unwrap();

        let job = queue.pop(None).await.unwrap().unwrap();
        let payload = Payload::decode(job.raw_body()).unwrap();

        assert_eq!(payload.job, "emails.send");
        assert_eq!(job.attempts(), 1);
        assert_eq!(job.queue(), "default");
    }

    #[tokio::test]
    async fn reserved_jobs_are_hidden_until_the_visibility_timeout() {
        let queue = store_queue(60);
        queue.push("jobs.slow", json!({}), None).await.unwrap();

        let _job = queue.pop(None).await.unwrap().unwrap();

        // Still reserved - nothing to deliver.
        assert!(queue.pop(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abandoned_deliveries_are_redelivered_after_expiry() {
        let queue = store_queue(0);
        queue.push("jobs.flaky", json!({}), None).await.unwrap();

        let first = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(first.attempts(), 1);
        drop(first);

        // Zero visibility timeout: the reservation expires immediately.
        let second = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(second.attempts(), 2);
    }

    #[tokio::test]
    async fn delete_acknowledges_the_reservation() {
        let queue = store_queue(0);
        queue.push("jobs.done", json!({}), None).await.unwrap();

        let mut job = queue.pop(None).await.unwrap().unwrap();
        job.delete().await.unwrap();
        assert!(job.is_deleted());

        assert!(queue.pop(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_reschedules_with_the_given_delay() {
        let queue = store_queue(60);
        queue.push("jobs.retry", json!({}), None).await.unwrap();

        let mut job = queue.pop(None).await.unwrap().unwrap();
        job.release(Delay::Seconds(3600)).await.unwrap();
        assert!(job.is_released());

        // Delayed an hour out - not visible yet.
        assert!(queue.pop(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn released_jobs_come_back_with_an_incremented_attempt() {
        let queue = store_queue(60);
        queue.push("jobs.retry", json!({}), None).await.unwrap();

        let mut job = queue.pop(None).await.unwrap().unwrap();
        job.release(Delay::none()).await.unwrap();

        let redelivered = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(redelivered.attempts(), 2);
    }

    #[tokio::test]
    async fn delayed_pushes_honor_their_schedule() {
        let queue = store_queue(60);

        queue
            .later(Delay::Seconds(3600), "jobs.slow", json!({}), None)
            .await
            .unwrap();
        assert!(queue.pop(None).await.unwrap().is_none());

        queue
            .later(Delay::none(), "jobs.fast", json!({}), None)
            .await
            .unwrap();
        let job = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(Payload::decode(job.raw_body()).unwrap().job, "jobs.fast");
    }
}
