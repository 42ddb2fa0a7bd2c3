use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{error, warn};

use crate::error::QueueResult;

/// Listener callback. Receives the concrete event name and the payload.
///
/// Returning `Some(Value::Bool(false))` stops propagation to later
/// listeners; any other `Some` value is collected as a response.
pub type Listener = dyn Fn(&str, &Value) -> Option<Value> + Send + Sync;

/// Hook used by queued listeners to push a call-back job onto the queue
/// system
pub type QueuePush = dyn Fn(&str, Value) -> QueueResult<()> + Send + Sync;

const PUSHED_SUFFIX: &str = "_pushed";

/// Priority/wildcard publish-subscribe bus for lifecycle notifications
///
/// Listeners for one event name are grouped by priority and sorted
/// descending on first use after any registration change; the sorted order
/// is cached until a new `listen` invalidates it. Wildcard subscriptions are
/// matched against concrete event names at fire time and always run after
/// the exact-name listeners.
pub struct EventDispatcher {
    /// Exact-name listeners grouped by priority
    listeners: RwLock<HashMap<String, BTreeMap<i32, Vec<Arc<Listener>>>>>,

    /// Glob-pattern listeners matched at fire time
    wildcards: RwLock<Vec<(String, Arc<Listener>)>>,

    /// Priority-sorted listener cache
    sorted: RwLock<HashMap<String, Vec<Arc<Listener>>>>,

    /// Stack of event names currently being fired
    firing: Arc<Mutex<Vec<String>>>,

    /// Queue hook for queued listeners
    queue_push: Arc<RwLock<Option<Arc<QueuePush>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            wildcards: RwLock::new(Vec::new()),
            sorted: RwLock::new(HashMap::new()),
            firing: Arc::new(Mutex::new(Vec::new())),
            queue_push: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a listener at the default priority
    pub fn listen<F>(&self, event: &str, listener: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.listen_with_priority(event, 0, listener);
    }

    /// Register a listener with an explicit priority.
    ///
    /// Higher priorities fire first. Patterns containing `*` register as
    /// wildcard listeners, which ignore priority and run after exact-name
    /// listeners.
    pub fn listen_with_priority<F>(&self, event: &str, priority: i32, listener: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        let listener: Arc<Listener> = Arc::new(listener);

        if event.contains('*') {
            self.wildcards.write().push((event.to_string(), listener));
        } else {
            self.listeners
                .write()
                .entry(event.to_string())
                .or_default()
                .entry(priority)
                .or_default()
                .push(listener);
            self.sorted.write().remove(event);
        }
    }

    /// Register a listener that runs as a queued job instead of inline.
    ///
    /// When the event fires, a call-back job referencing `handler_ref` is
    /// pushed through the queue hook with `{"event", "payload"}` as its
    /// data. A re-entrant fire of an event already on the firing stack skips
    /// the enqueue, so a queued listener whose handler synchronously
    /// re-emits its own event cannot feed back forever.
    pub fn listen_queued(&self, event: &str, handler_ref: &str) {
        let push_cell = Arc::clone(&self.queue_push);
        let firing = Arc::clone(&self.firing);
        let handler_ref = handler_ref.to_string();

        self.listen(event, move |name, payload| {
            let reentrant = firing
                .lock()
                .iter()
                .filter(|active| active.as_str() == name)
                .count()
                > 1;
            if reentrant {
                warn!(event = name, handler = %handler_ref, "skipping queued listener for re-entrant event");
                return None;
            }

            let push = push_cell.read().clone();
            match push {
                Some(push) => {
                    let data = serde_json::json!({ "event": name, "payload": payload });
                    if let Err(err) = push(&handler_ref, data) {
                        error!(event = name, handler = %handler_ref, %err, "failed to enqueue queued listener");
                    }
                }
                None => {
                    warn!(event = name, handler = %handler_ref, "queued listener has no queue hook")
                }
            }

            None
        });
    }

    /// Install the queue hook used by queued listeners
    pub fn set_queue_resolver<F>(&self, push: F)
    where
        F: Fn(&str, Value) -> QueueResult<()> + Send + Sync + 'static,
    {
        *self.queue_push.write() = Some(Arc::new(push));
    }

    /// Register an event and payload to be fired later by [`flush`]
    ///
    /// [`flush`]: EventDispatcher::flush
    pub fn push(&self, event: &str, payload: Value) {
        let original = event.to_string();

        self.listen(&format!("{event}{PUSHED_SUFFIX}"), move |_, _| {
            Some(serde_json::json!({ "event": original.clone(), "payload": payload.clone() }))
        });
    }

    /// Fire a set of pushed events
    pub fn flush(&self, event: &str) {
        for response in self.fire(&format!("{event}{PUSHED_SUFFIX}"), &Value::Null) {
            if let (Some(name), Some(payload)) = (
                response.get("event").and_then(Value::as_str),
                response.get("payload"),
            ) {
                self.fire(name, payload);
            }
        }
    }

    /// Forget all pushed-event listeners
    pub fn forget_pushed(&self) {
        let pushed: Vec<String> = self
            .listeners
            .read()
            .keys()
            .filter(|key| key.ends_with(PUSHED_SUFFIX))
            .cloned()
            .collect();

        for event in pushed {
            self.forget(&event);
        }
    }

    /// Fire an event and collect the listener responses
    pub fn fire(&self, event: &str, payload: &Value) -> Vec<Value> {
        self.dispatch(event, payload, false).responses
    }

    /// Fire an event until the first non-null response is returned
    pub fn until(&self, event: &str, payload: &Value) -> Option<Value> {
        self.dispatch(event, payload, true).halted
    }

    fn dispatch(&self, event: &str, payload: &Value, halt: bool) -> Dispatch {
        let listeners = self.listeners_for(event);

        self.firing.lock().push(event.to_string());

        let mut responses = Vec::new();
        let mut halted = None;

        for listener in listeners {
            let response = listener(event, payload);

            if halt {
                if let Some(value) = response {
                    halted = Some(value);
                    break;
                }
                continue;
            }

            match response {
                Some(Value::Bool(false)) => break,
                Some(value) => responses.push(value),
                None => {}
            }
        }

        self.firing.lock().pop();

        Dispatch { responses, halted }
    }

    /// Get the event currently being fired, if any
    pub fn firing(&self) -> Option<String> {
        self.firing.lock().last().cloned()
    }

    /// Check whether an event has any listeners
    pub fn has_listeners(&self, event: &str) -> bool {
        if self.listeners.read().contains_key(event) {
            return true;
        }

        self.wildcards
            .read()
            .iter()
            .any(|(pattern, _)| pattern == event || pattern_matches(pattern, event))
    }

    /// Remove all listeners registered for an event or wildcard pattern
    pub fn forget(&self, event: &str) {
        if event.contains('*') {
            self.wildcards.write().retain(|(pattern, _)| pattern != event);
        } else {
            self.listeners.write().remove(event);
            self.sorted.write().remove(event);
        }
    }

    fn listeners_for(&self, event: &str) -> Vec<Arc<Listener>> {
        let mut list = match self.sorted.read().get(event) {
            Some(sorted) => sorted.clone(),
            None => {
                let sorted = self.sort_listeners(event);
                self.sorted
                    .write()
                    .insert(event.to_string(), sorted.clone());
                sorted
            }
        };

        for (pattern, listener) in self.wildcards.read().iter() {
            if pattern_matches(pattern, event) {
                list.push(Arc::clone(listener));
            }
        }

        list
    }

    fn sort_listeners(&self, event: &str) -> Vec<Arc<Listener>> {
        match self.listeners.read().get(event) {
            Some(buckets) => buckets
                .iter()
                .rev()
                .flat_map(|(_, group)| group.iter().cloned())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

struct Dispatch {
    responses: Vec<Value>,
    halted: Option<Value>,
}

/// Match a glob pattern (with `*` wildcards) against a concrete event name
fn pattern_matches(pattern: &str, name: &str) -> bool {
    let mut segments = pattern.split('*');

    let first = segments.next().unwrap_or("");
    if !name.starts_with(first) {
        return false;
    }
    let mut rest = &name[first.len()..];

    let mut middle: Vec<&str> = segments.collect();
    let Some(last) = middle.pop() else {
        // No wildcard in the pattern - require an exact match.
        return rest.is_empty();
    };

    for segment in middle {
        match rest.find(segment) {
            Some(index) => rest = &rest[index + segment.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}
