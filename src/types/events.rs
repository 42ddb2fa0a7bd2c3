use serde::Serialize;
use serde_json::Value;

use super::Payload;

/// Dispatcher channel names for worker lifecycle notifications
///
/// Job-scoped events share the `queue.job.` prefix so a single
/// `queue.job.*` wildcard observes the whole job lifecycle.
pub mod topics {
    pub const PROCESSING: &str = "queue.job.processing";
    pub const PROCESSED: &str = "queue.job.processed";
    pub const EXCEPTION: &str = "queue.job.exception";
    pub const FAILED: &str = "queue.job.failed";
    pub const LOOPING: &str = "queue.looping";
    pub const STOPPING: &str = "queue.worker.stopping";
}

/// Lifecycle events fired on the shared dispatcher during job processing
///
/// Each job event carries the decoded [`Payload`], not the raw string, for
/// observer convenience.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueueEvent {
    /// A job is about to fire
    JobProcessing {
        connection: String,
        queue: String,
        payload: Payload,
    },

    /// A job fired without error
    JobProcessed {
        connection: String,
        queue: String,
        payload: Payload,
    },

    /// A job's handler raised an error
    JobExceptionOccurred {
        connection: String,
        queue: String,
        payload: Payload,
        error: String,
    },

    /// A job exhausted its attempts and was logged as failed
    JobFailed {
        connection: String,
        queue: String,
        payload: Payload,
        failure_id: Option<u64>,
    },

    /// The daemon worker is stopping
    WorkerStopping,
}

impl QueueEvent {
    /// Get the dispatcher channel this event fires on
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobProcessing { .. } => topics::PROCESSING,
            Self::JobProcessed { .. } => topics::PROCESSED,
            Self::JobExceptionOccurred { .. } => topics::EXCEPTION,
            Self::JobFailed { .. } => topics::FAILED,
            Self::WorkerStopping => topics::STOPPING,
        }
    }

    /// Render the event as a dispatcher payload value
    pub fn payload_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_events_serialize_to_flat_objects() {
        let event = QueueEvent::JobFailed {
            connection: "memory".to_string(),
            queue: "default".to_string(),
            payload: Payload {
                job: "emails.send".to_string(),
                data: json!({"to": "x@example.com"}),
            },
            failure_id: Some(7),
        };

        assert_eq!(event.name(), topics::FAILED);

        let value = event.payload_value();
        assert_eq!(value["connection"], "memory");
        assert_eq!(value["failure_id"], 7);
        assert_eq!(value["payload"]["job"], "emails.send");
    }

    #[test]
    fn worker_stopping_carries_no_payload() {
        let event = QueueEvent::WorkerStopping;

        assert_eq!(event.name(), topics::STOPPING);
        assert_eq!(event.payload_value(), Value::Null);
    }
}
