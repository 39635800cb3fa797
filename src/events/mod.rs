//! Priority event dispatcher.
//!
//! Controllers emit lifecycle events; interested components register named
//! callbacks. Synchronous delivery runs every handler inline in
//! registration order. Asynchronous delivery queues the event by priority
//! and fans each handler out as its own unit of work on the worker pool, so
//! one slow handler cannot starve the others.
//!
//! A handler failure is logged and dropped; event delivery is never a
//! correctness dependency.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::priorities;
use crate::errors::Result;
use crate::records::Kind;

/// One emitted event. `subject` names the entity it concerns (a login, a
/// group name, a machine id rendered as text); `data` carries any extra
/// structured payload as JSON.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub kind: Option<Kind>,
    pub subject: String,
    pub data: serde_json::Value,
    pub priority: i32,
    /// Deliver all handlers inline, in registration order, as one unit of
    /// work, even when the event travels through the queue.
    pub synchronous: bool,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            subject: String::new(),
            data: serde_json::Value::Null,
            priority: priorities::NORMAL,
            synchronous: false,
        }
    }

    pub fn with_kind(
        mut self,
        kind: Kind,
    ) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_subject(
        mut self,
        subject: impl Into<String>,
    ) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_data(
        mut self,
        data: serde_json::Value,
    ) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(
        mut self,
        priority: i32,
    ) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }
}

pub type HandlerFn = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// A component exposing named event callbacks. `register_all` wires the
/// whole table in one call; the names are the explicit dispatch tags.
pub trait Subscriber: Send + Sync {
    fn callbacks(&self) -> Vec<(&'static str, HandlerFn)>;
}

struct Completion {
    remaining: Arc<AtomicUsize>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Completion {
    fn handler_done(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            (self.callback)();
        }
    }
}

enum Work {
    /// Fan an event out to its handlers.
    Deliver {
        event: Arc<Event>,
        done: Option<Arc<Completion>>,
    },
    /// Run one handler against one event.
    RunOne {
        event: Arc<Event>,
        handler: HandlerFn,
        done: Option<Arc<Completion>>,
    },
}

struct QueuedWork {
    priority: i32,
    seq: u64,
    work: Work,
}

// Max-heap: smaller priority value and earlier sequence pop first.
impl Ord for QueuedWork {
    fn cmp(
        &self,
        other: &Self,
    ) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedWork {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedWork {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedWork {}

struct DispatcherInner {
    handlers: RwLock<HashMap<String, Vec<HandlerFn>>>,
    queue: Mutex<BinaryHeap<QueuedWork>>,
    available: Condvar,
    running: AtomicBool,
    seq: AtomicU64,
    warned_unknown: Mutex<HashSet<String>>,
}

impl DispatcherInner {
    fn handlers_for(
        &self,
        event: &Event,
    ) -> Vec<HandlerFn> {
        let handlers = self
            .handlers
            .read()
            .get(&event.name)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            // One warning per unknown event name, not one per emission.
            if self.warned_unknown.lock().insert(event.name.clone()) {
                warn!(event = %event.name, "event has no registered handlers");
            }
        }
        handlers
    }

    fn push(
        &self,
        priority: i32,
        work: Work,
    ) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().push(QueuedWork {
            priority,
            seq,
            work,
        });
        self.available.notify_one();
    }

    fn run_handler(
        &self,
        handler: &HandlerFn,
        event: &Event,
    ) {
        if let Err(err) = handler(event) {
            error!(event = %event.name, error = %err, "event handler failed");
        }
    }
}

pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                handlers: RwLock::new(HashMap::new()),
                queue: Mutex::new(BinaryHeap::new()),
                available: Condvar::new(),
                running: AtomicBool::new(false),
                seq: AtomicU64::new(0),
                warned_unknown: Mutex::new(HashSet::new()),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Idempotent.
    pub fn start(
        &self,
        workers: usize,
    ) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut pool = self.workers.lock();
        for index in 0..workers {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("sysdir-events-{index}"))
                .spawn(move || worker_loop(inner));
            match handle {
                Ok(handle) => pool.push(handle),
                Err(err) => error!(error = %err, "failed to spawn event worker"),
            }
        }
        info!(workers = pool.len(), "event dispatcher started");
    }

    /// Drain nothing, stop everything: queued work not yet picked up is
    /// dropped.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Bridge the race between a worker's running check and its wait.
        drop(self.inner.queue.lock());
        self.inner.available.notify_all();
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                error!("event worker panicked");
            }
        }
        info!("event dispatcher stopped");
    }

    pub fn register(
        &self,
        event_name: impl Into<String>,
        handler: HandlerFn,
    ) {
        let name = event_name.into();
        debug!(event = %name, "handler registered");
        self.inner
            .handlers
            .write()
            .entry(name)
            .or_default()
            .push(handler);
    }

    /// Remove one previously registered handler, matched by identity.
    pub fn unregister(
        &self,
        event_name: &str,
        handler: &HandlerFn,
    ) {
        let mut handlers = self.inner.handlers.write();
        if let Some(list) = handlers.get_mut(event_name) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
            if list.is_empty() {
                handlers.remove(event_name);
            }
        }
    }

    /// Register every callback a subscriber exposes.
    pub fn register_all(
        &self,
        subscriber: &dyn Subscriber,
    ) {
        for (name, handler) in subscriber.callbacks() {
            self.register(name, handler);
        }
    }

    /// Synchronous delivery: run every handler inline, in registration
    /// order, before returning.
    pub fn run_event(
        &self,
        event: &Event,
    ) {
        for handler in self.inner.handlers_for(event) {
            self.inner.run_handler(&handler, event);
        }
    }

    /// Asynchronous delivery by priority.
    pub fn dispatch(
        &self,
        event: Event,
    ) {
        self.dispatch_inner(event, None);
    }

    /// Asynchronous delivery; `callback` runs once after every handler has
    /// finished (immediately when there are none).
    pub fn dispatch_with_callback(
        &self,
        event: Event,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) {
        self.dispatch_inner(event, Some(callback));
    }

    /// Queue an event without delivering it, so a later `start` drains the
    /// backlog in priority order.
    #[cfg(test)]
    pub(crate) fn enqueue_paused(
        &self,
        event: Event,
    ) {
        let priority = event.priority;
        self.inner.push(
            priority,
            Work::Deliver {
                event: Arc::new(event),
                done: None,
            },
        );
    }

    fn dispatch_inner(
        &self,
        event: Event,
        callback: Option<Arc<dyn Fn() + Send + Sync>>,
    ) {
        if !self.inner.running.load(Ordering::SeqCst) {
            // No worker pool: degrade to inline delivery so client-mode
            // callers still observe their own events.
            self.run_event(&event);
            if let Some(callback) = callback {
                callback();
            }
            return;
        }
        let priority = event.priority;
        let done = callback.map(|callback| {
            Arc::new(Completion {
                remaining: Arc::new(AtomicUsize::new(0)),
                callback,
            })
        });
        self.inner.push(
            priority,
            Work::Deliver {
                event: Arc::new(event),
                done,
            },
        );
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(inner: Arc<DispatcherInner>) {
    loop {
        let item = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(item) = queue.pop() {
                    break item;
                }
                if !inner.running.load(Ordering::SeqCst) {
                    return;
                }
                inner.available.wait(&mut queue);
            }
        };

        match item.work {
            Work::Deliver { event, done } => {
                let handlers = inner.handlers_for(&event);
                if event.synchronous || handlers.is_empty() {
                    // Synchronous events keep registration order: all
                    // handlers run here, inside this one unit of work.
                    for handler in &handlers {
                        inner.run_handler(handler, &event);
                    }
                    if let Some(done) = &done {
                        (done.callback)();
                    }
                    continue;
                }
                if let Some(done) = &done {
                    done.remaining.store(handlers.len(), Ordering::SeqCst);
                }
                for handler in handlers {
                    inner.push(
                        item.priority,
                        Work::RunOne {
                            event: Arc::clone(&event),
                            handler,
                            done: done.clone(),
                        },
                    );
                }
            }
            Work::RunOne {
                event,
                handler,
                done,
            } => {
                inner.run_handler(&handler, &event);
                if let Some(done) = done {
                    done.handler_done();
                }
            }
        }
    }
}
