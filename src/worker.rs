use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::backend::Queue;
use crate::dispatcher::EventDispatcher;
use crate::error::{QueueError, QueueResult};
use crate::failed::FailedJobProvider;
use crate::job::Job;
use crate::manager::QueueManager;
use crate::types::{topics, Delay, Payload, QueueEvent};

/// Options controlling one daemon run
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Connection name; `None` uses the configured default
    pub connection: Option<String>,

    /// Comma-separated queue names polled in order; `None` uses the
    /// backend's default queue
    pub queue: Option<String>,

    /// Delay in seconds applied when a failed job is released back onto the
    /// queue
    pub delay_secs: u64,

    /// Resident memory ceiling in megabytes
    pub memory_limit_mb: u64,

    /// Idle sleep between empty polls, in seconds
    pub sleep_secs: u64,

    /// Delivery attempts before a job is failed permanently; `0` disables
    /// the ceiling
    pub max_tries: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            connection: None,
            queue: None,
            delay_secs: 0,
            memory_limit_mb: 128,
            sleep_secs: 3,
            max_tries: 0,
        }
    }
}

/// Why the daemon loop terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Resident memory reached the configured ceiling
    MemoryExceeded,

    /// The restart signal changed since the loop started
    RestartSignal,
}

/// Result of one pop-and-process pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PopOutcome {
    /// Whether a job was dequeued this pass
    pub job_found: bool,

    /// Whether the job took the permanent-failure path
    pub failed: bool,
}

impl PopOutcome {
    fn idle() -> Self {
        Self::default()
    }
}

/// Sink for errors the daemon loop swallows
pub trait ExceptionReporter: Send + Sync {
    fn report(&self, error: &QueueError);
}

/// Default reporter - logs through `tracing`
pub struct TracingReporter;

impl ExceptionReporter for TracingReporter {
    fn report(&self, error: &QueueError) {
        error!(%error, "queue worker caught an error");
    }
}

/// Source of the "last restart" broadcast consumed by daemon workers
pub trait RestartSignal: Send + Sync {
    /// Unix timestamp of the most recent restart request, if any
    fn last_restart(&self) -> Option<i64>;
}

/// In-process restart signal for tests and single-host deployments
#[derive(Default)]
pub struct MemoryRestartSignal {
    timestamp: RwLock<Option<i64>>,
}

impl MemoryRestartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that every listening worker restart
    pub fn broadcast(&self) {
        *self.timestamp.write() = Some(chrono::Utc::now().timestamp());
    }
}

impl RestartSignal for MemoryRestartSignal {
    fn last_restart(&self) -> Option<i64> {
        *self.timestamp.read()
    }
}

type MemoryMeter = Box<dyn Fn() -> u64 + Send + Sync>;

/// Daemon worker - pops jobs from a resolved connection, enforces the retry
/// ceiling, fires handlers, and emits lifecycle events
///
/// One job is fetched and fully processed before the next is fetched;
/// horizontal concurrency comes from running multiple worker processes
/// against the same backend.
pub struct Worker {
    manager: Arc<QueueManager>,
    failer: Arc<dyn FailedJobProvider>,
    events: Arc<EventDispatcher>,
    reporter: Arc<dyn ExceptionReporter>,
    restart_signal: Option<Arc<dyn RestartSignal>>,
    memory_meter: MemoryMeter,
}

impl Worker {
    pub fn new(manager: Arc<QueueManager>, failer: Arc<dyn FailedJobProvider>) -> Self {
        let events = Arc::clone(manager.events());

        Self {
            manager,
            failer,
            events,
            reporter: Arc::new(TracingReporter),
            restart_signal: None,
            memory_meter: Box::new(resident_memory_mb),
        }
    }

    /// Replace the exception reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn ExceptionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Attach a restart-signal store
    pub fn with_restart_signal(mut self, signal: Arc<dyn RestartSignal>) -> Self {
        self.restart_signal = Some(signal);
        self
    }

    /// Replace the resident-memory gauge (tests)
    pub fn with_memory_meter<F>(mut self, meter: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.memory_meter = Box::new(meter);
        self
    }

    /// Process jobs in a loop until an explicit stop condition.
    ///
    /// Dequeue and processing errors are reported and never terminate the
    /// loop; it ends only when the memory ceiling is reached or the restart
    /// signal changes, always after firing the worker-stopping event. The
    /// hosting process is expected to exit once this returns.
    pub async fn daemon(&self, options: &WorkerOptions) -> WorkerExit {
        let last_restart = self.last_restart_timestamp();
        info!(
            connection = %self.manager.connection_name(options.connection.as_deref()),
            queue = options.queue.as_deref().unwrap_or("default"),
            "queue worker started"
        );

        loop {
            if self.daemon_should_run() {
                self.run_next_job(options).await;
            } else {
                debug!("daemon tick vetoed");
                self.sleep(options.sleep_secs).await;
            }

            if self.memory_exceeded(options.memory_limit_mb) {
                warn!(limit_mb = options.memory_limit_mb, "memory ceiling reached");
                self.stop();
                return WorkerExit::MemoryExceeded;
            }

            if self.should_restart(last_restart) {
                info!("restart signal received");
                self.stop();
                return WorkerExit::RestartSignal;
            }
        }
    }

    /// Determine if the daemon should process on this iteration
    fn daemon_should_run(&self) -> bool {
        if self.manager.is_down_for_maintenance() {
            return false;
        }

        self.events.until(topics::LOOPING, &serde_json::Value::Null)
            != Some(serde_json::Value::Bool(false))
    }

    /// Pop and process the next job, swallowing every error.
    ///
    /// Sleeps for the configured interval when no job is available or an
    /// error got in the way, so one bad tick never spins the loop.
    pub async fn run_next_job(&self, options: &WorkerOptions) -> PopOutcome {
        let connection_name = self.manager.connection_name(options.connection.as_deref());

        match self.pop_and_process(&connection_name, options).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.reporter.report(&error);
                self.sleep(options.sleep_secs).await;
                PopOutcome::idle()
            }
        }
    }

    async fn pop_and_process(
        &self,
        connection_name: &str,
        options: &WorkerOptions,
    ) -> QueueResult<PopOutcome> {
        let connection = self.manager.connection(options.connection.as_deref())?;

        match self.next_job(connection.as_ref(), options.queue.as_deref()).await? {
            Some(mut job) => {
                self.process(
                    connection_name,
                    job.as_mut(),
                    options.max_tries,
                    Delay::Seconds(options.delay_secs),
                )
                .await
            }
            None => {
                self.sleep(options.sleep_secs).await;
                Ok(PopOutcome::idle())
            }
        }
    }

    /// Get the next job, trying each name in a comma-separated queue list in
    /// order
    async fn next_job(
        &self,
        connection: &dyn Queue,
        queue: Option<&str>,
    ) -> QueueResult<Option<Box<dyn Job>>> {
        let Some(queue) = queue else {
            return connection.pop(None).await;
        };

        for name in queue.split(',') {
            if let Some(job) = connection.pop(Some(name.trim())).await? {
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    /// Process a given job from the queue.
    ///
    /// Handler errors are returned to the caller after the release step; the
    /// daemon loop reports them and moves on.
    pub async fn process(
        &self,
        connection: &str,
        job: &mut dyn Job,
        max_tries: u32,
        delay: Delay,
    ) -> QueueResult<PopOutcome> {
        if max_tries > 0 && job.attempts() > max_tries {
            return Ok(self.log_failed_job(connection, job).await);
        }

        self.raise_event(QueueEvent::JobProcessing {
            connection: connection.to_string(),
            queue: job.queue().to_string(),
            payload: decoded_payload(job),
        });

        match job.fire().await {
            Ok(()) => {
                debug!(queue = job.queue(), attempts = job.attempts(), "job processed");
                self.raise_event(QueueEvent::JobProcessed {
                    connection: connection.to_string(),
                    queue: job.queue().to_string(),
                    payload: decoded_payload(job),
                });

                Ok(PopOutcome {
                    job_found: true,
                    failed: false,
                })
            }
            Err(error) => {
                let event = QueueEvent::JobExceptionOccurred {
                    connection: connection.to_string(),
                    queue: job.queue().to_string(),
                    payload: decoded_payload(job),
                    error: error.to_string(),
                };

                // A panicking listener must not suppress the release below.
                if catch_unwind(AssertUnwindSafe(|| self.raise_event(event))).is_err() {
                    error!("listener panicked while handling the job exception event");
                }

                if !job.is_deleted() {
                    if let Err(release_error) = job.release(delay).await {
                        self.reporter.report(&release_error);
                    }
                }

                Err(QueueError::Handler(error))
            }
        }
    }

    /// Permanent-failure path: log, delete, run the failed hook, notify.
    ///
    /// The handler is never fired for a job that arrives here.
    async fn log_failed_job(&self, connection: &str, job: &mut dyn Job) -> PopOutcome {
        warn!(
            queue = job.queue(),
            attempts = job.attempts(),
            "job exceeded its retry ceiling"
        );

        let failure_id = self.failer.log(connection, job.queue(), job.raw_body());

        if let Err(error) = job.delete().await {
            self.reporter.report(&error);
        }
        job.failed().await;

        self.raise_event(QueueEvent::JobFailed {
            connection: connection.to_string(),
            queue: job.queue().to_string(),
            payload: decoded_payload(job),
            failure_id,
        });

        PopOutcome {
            job_found: true,
            failed: true,
        }
    }

    /// Determine if the memory ceiling has been reached
    pub fn memory_exceeded(&self, limit_mb: u64) -> bool {
        (self.memory_meter)() >= limit_mb
    }

    /// Fire the worker-stopping event.
    ///
    /// The daemon loop calls this before returning its exit reason.
    pub fn stop(&self) {
        self.raise_event(QueueEvent::WorkerStopping);
    }

    async fn sleep(&self, seconds: u64) {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }

    fn last_restart_timestamp(&self) -> Option<i64> {
        self.restart_signal
            .as_ref()
            .and_then(|signal| signal.last_restart())
    }

    fn should_restart(&self, last_restart: Option<i64>) -> bool {
        self.last_restart_timestamp() != last_restart
    }

    fn raise_event(&self, event: QueueEvent) {
        let payload = event.payload_value();
        self.events.fire(event.name(), &payload);
    }
}

fn decoded_payload(job: &dyn Job) -> Payload {
    Payload::decode(job.raw_body()).unwrap_or_else(|_| Payload::unparsed())
}

/// Resident set size of the current process, in megabytes
fn resident_memory_mb() -> u64 {
    use sysinfo::System;

    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };

    let mut system = System::new();
    if !system.refresh_process(pid) {
        return 0;
    }

    system
        .process(pid)
        .map(|process| process.memory() / 1024 / 1024)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, QueueConfig};
    use crate::job::HandlerRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn worker() -> Worker {
        let config =
            QueueConfig::new("memory").with_connection("memory", ConnectionConfig::new("memory"));
        let manager = Arc::new(QueueManager::new(
            config,
            Arc::new(HandlerRegistry::new()),
            Arc::new(EventDispatcher::new()),
        ));

        Worker::new(manager, Arc::new(crate::failed::NullFailedJobProvider::new()))
    }

    #[test]
    fn maintenance_mode_vetoes_the_tick() {
        let worker = worker();
        assert!(worker.daemon_should_run());

        worker.manager.set_maintenance_check(|| true);
        assert!(!worker.daemon_should_run());
    }

    #[test]
    fn looping_listener_false_vetoes_the_tick() {
        let worker = worker();

        worker
            .events
            .listen(topics::LOOPING, |_, _| Some(serde_json::Value::Bool(false)));

        assert!(!worker.daemon_should_run());
    }

    #[test]
    fn memory_gauge_drives_the_ceiling_check() {
        let worker = worker().with_memory_meter(|| 130);

        assert!(worker.memory_exceeded(128));
        assert!(!worker.memory_exceeded(256));
    }

    #[test]
    fn restart_signal_changes_are_detected() {
        let signal = Arc::new(MemoryRestartSignal::new());
        let worker =
            worker().with_restart_signal(Arc::clone(&signal) as Arc<dyn RestartSignal>);

        let at_start = worker.last_restart_timestamp();
        assert!(!worker.should_restart(at_start));

        signal.broadcast();
        assert!(worker.should_restart(at_start));
    }

    #[test]
    fn stop_fires_the_stopping_event() {
        let worker = worker();
        let fired = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&fired);
        worker.events.listen(topics::STOPPING, move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            None
        });

        worker.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
