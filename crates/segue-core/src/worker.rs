//! Background worker: a bounded pool of threads running cancellable,
//! timeout-bound tasks.
//!
//! A task goes QUEUED → RUNNING → probe loop → {COMPLETED | CANCELLED |
//! TIMED_OUT}. Running starts with `WorkerCallbacks::start`, then the task
//! sleeps until a probe request, a cancel request or its deadline, and asks
//! `probe` whether it is done at each wake. `stop` is called exactly once
//! for every task whose `start` succeeded.
//!
//! Threads are spawned lazily while uncompleted tasks outnumber them (up to
//! `max_threads`) and retire after `idle_timeout` without work. The queue
//! and the thread records have their own lock, unrelated to the player lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};

/// How a started task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEnd {
    /// `probe` reported the job done.
    Completed,
    /// `cancel` matched the task while it was running.
    Cancelled,
    /// The deadline passed before the job was done.
    TimedOut,
}

/// Task hooks. All of them run on worker threads, never under the pool lock.
pub trait WorkerCallbacks: Send + Sync + 'static {
    /// Payload of a task.
    type Entity: Send + 'static;
    /// Owner id used to cancel groups of tasks.
    type Id: Clone + PartialEq + Send + 'static;
    /// Per-run state returned by `start`.
    type Handle: Send + 'static;

    /// Begin the job. `None` means failure: the task completes at once and
    /// `stop` is not called.
    fn start(&self, entity: &Self::Entity) -> Option<Self::Handle>;

    /// Must be cheap and non-blocking: it runs at every wake.
    fn probe(&self, handle: &mut Self::Handle) -> bool;

    fn stop(&self, entity: Self::Entity, handle: Self::Handle, end: TaskEnd);
}

struct Task<C: WorkerCallbacks> {
    entity: C::Entity,
    id: C::Id,
    timeout: Option<Duration>,
}

/// Wake flags of one worker thread, guarded by its own lock.
struct Slot<Id> {
    signal: Mutex<Signal<Id>>,
    wake: Condvar,
}

struct Signal<Id> {
    task: Option<Id>,
    probe_request: bool,
    cancel_request: bool,
}

impl<Id> Slot<Id> {
    fn new() -> Self {
        Self {
            signal: Mutex::new(Signal {
                task: None,
                probe_request: false,
                cancel_request: false,
            }),
            wake: Condvar::new(),
        }
    }
}

struct State<C: WorkerCallbacks> {
    queue: VecDeque<Task<C>>,
    slots: Vec<Arc<Slot<C::Id>>>,
    uncompleted: usize,
    nthreads: usize,
    closing: bool,
}

struct Shared<C: WorkerCallbacks> {
    callbacks: C,
    max_threads: usize,
    default_timeout: Option<Duration>,
    idle_timeout: Duration,
    state: Mutex<State<C>>,
    queue_wait: Condvar,
    nothreads_wait: Condvar,
}

/// The pool. Dropping it cancels everything and waits for all threads.
pub struct BackgroundWorker<C: WorkerCallbacks> {
    shared: Arc<Shared<C>>,
}

impl<C: WorkerCallbacks> BackgroundWorker<C> {
    pub fn new(config: &WorkerConfig, callbacks: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                callbacks,
                max_threads: config.max_threads.max(1),
                default_timeout: config.default_timeout(),
                idle_timeout: config.idle_timeout(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    slots: Vec::new(),
                    uncompleted: 0,
                    nthreads: 0,
                    closing: false,
                }),
                queue_wait: Condvar::new(),
                nothreads_wait: Condvar::new(),
            }),
        }
    }

    pub fn callbacks(&self) -> &C {
        &self.shared.callbacks
    }

    /// Queue a task. `timeout`: `None` uses the configured default,
    /// `Some(Duration::ZERO)` disables the deadline.
    ///
    /// Fails only if no thread exists and none can be spawned; the task is
    /// then dropped and the pool is left unchanged.
    pub fn push(&self, entity: C::Entity, id: C::Id, timeout: Option<Duration>) -> Result<()> {
        let timeout = match timeout {
            None => self.shared.default_timeout,
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
        };

        let mut state = self.shared.state.lock();
        state.queue.push_back(Task { entity, id, timeout });
        state.uncompleted += 1;

        if state.uncompleted > state.nthreads && state.nthreads < self.shared.max_threads {
            let slot = Arc::new(Slot::new());
            let shared = Arc::clone(&self.shared);
            let thread_slot = Arc::clone(&slot);
            let spawned = thread::Builder::new()
                .name("segue-worker".into())
                .spawn(move || worker_loop(shared, thread_slot));
            match spawned {
                Ok(_) => {
                    state.slots.push(slot);
                    state.nthreads += 1;
                }
                Err(e) if state.nthreads == 0 => {
                    state.queue.pop_back();
                    state.uncompleted -= 1;
                    log::error!("segue: cannot spawn worker thread: {}", e);
                    return Err(Error::Spawn(e.to_string()));
                }
                Err(e) => {
                    log::warn!("segue: cannot spawn extra worker thread: {}", e);
                }
            }
        }

        self.shared.queue_wait.notify_one();
        Ok(())
    }

    /// Drop queued tasks matching `id` (all when `None`) and ask matching
    /// running tasks to stop. Running tasks notice at their next wake.
    pub fn cancel(&self, id: Option<&C::Id>) {
        let mut state = self.shared.state.lock();
        cancel_locked(&mut state, id);
    }

    /// Wake every running task so it probes again.
    pub fn request_probe(&self) {
        let state = self.shared.state.lock();
        for slot in &state.slots {
            let mut signal = slot.signal.lock();
            signal.probe_request = true;
            slot.wake.notify_one();
        }
    }

    /// Tasks queued or running.
    pub fn uncompleted(&self) -> usize {
        self.shared.state.lock().uncompleted
    }

    /// Worker threads alive.
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().nthreads
    }
}

impl<C: WorkerCallbacks> Drop for BackgroundWorker<C> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.closing = true;
        cancel_locked(&mut state, None);
        self.shared.queue_wait.notify_all();
        while state.nthreads > 0 {
            self.shared.nothreads_wait.wait(&mut state);
        }
    }
}

fn cancel_locked<C: WorkerCallbacks>(state: &mut State<C>, id: Option<&C::Id>) {
    let before = state.queue.len();
    state.queue.retain(|task| id.is_some_and(|id| *id != task.id));
    state.uncompleted -= before - state.queue.len();

    for slot in &state.slots {
        let mut signal = slot.signal.lock();
        let matches = match (&signal.task, id) {
            (Some(_), None) => true,
            (Some(running), Some(id)) => running == id,
            (None, _) => false,
        };
        if matches {
            signal.cancel_request = true;
            slot.wake.notify_one();
        }
    }
}

fn worker_loop<C: WorkerCallbacks>(shared: Arc<Shared<C>>, slot: Arc<Slot<C::Id>>) {
    while let Some(task) = take_task(&shared, &slot) {
        run_task(&shared, &slot, task);

        slot.signal.lock().task = None;
        let mut state = shared.state.lock();
        state.uncompleted -= 1;
    }
}

/// Wait for the next task; `None` once idle for too long or closing. The
/// thread deregisters itself in the same critical section that saw the
/// queue empty, so `push` never counts a thread that is about to leave.
fn take_task<C: WorkerCallbacks>(shared: &Shared<C>, slot: &Arc<Slot<C::Id>>) -> Option<Task<C>> {
    let deadline = Instant::now() + shared.idle_timeout;
    let mut state = shared.state.lock();
    loop {
        if !state.closing {
            if let Some(task) = state.queue.pop_front() {
                let mut signal = slot.signal.lock();
                signal.task = Some(task.id.clone());
                signal.probe_request = false;
                signal.cancel_request = false;
                return Some(task);
            }
        }
        if state.closing || shared.queue_wait.wait_until(&mut state, deadline).timed_out() {
            if !state.closing && !state.queue.is_empty() {
                continue;
            }
            state.slots.retain(|s| !Arc::ptr_eq(s, slot));
            state.nthreads -= 1;
            if state.nthreads == 0 {
                shared.nothreads_wait.notify_all();
            }
            return None;
        }
    }
}

fn run_task<C: WorkerCallbacks>(shared: &Shared<C>, slot: &Slot<C::Id>, task: Task<C>) {
    let callbacks = &shared.callbacks;
    let Some(mut handle) = callbacks.start(&task.entity) else {
        log::debug!("segue: worker task failed to start");
        return;
    };
    let deadline = task.timeout.map(|t| Instant::now() + t);

    if callbacks.probe(&mut handle) {
        callbacks.stop(task.entity, handle, TaskEnd::Completed);
        return;
    }

    loop {
        let end = {
            let mut signal = slot.signal.lock();
            let mut timed_out = false;
            while !timed_out && !signal.probe_request && !signal.cancel_request {
                match deadline {
                    Some(deadline) => timed_out = slot.wake.wait_until(&mut signal, deadline).timed_out(),
                    None => slot.wake.wait(&mut signal),
                }
            }
            signal.probe_request = false;
            if signal.cancel_request {
                Some(TaskEnd::Cancelled)
            } else if timed_out {
                Some(TaskEnd::TimedOut)
            } else {
                None
            }
        };

        match end {
            Some(end) => {
                callbacks.stop(task.entity, handle, end);
                return;
            }
            None if callbacks.probe(&mut handle) => {
                callbacks.stop(task.entity, handle, TaskEnd::Completed);
                return;
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread::ThreadId;

    #[derive(Default)]
    struct Recorder {
        starts: AtomicUsize,
        stops: Mutex<Vec<(u32, TaskEnd)>>,
        done: AtomicBool,
        fail_start: AtomicBool,
        running: AtomicUsize,
        max_running: AtomicUsize,
        threads: Mutex<HashSet<ThreadId>>,
    }

    impl WorkerCallbacks for Arc<Recorder> {
        type Entity = u32;
        type Id = &'static str;
        type Handle = u32;

        fn start(&self, entity: &u32) -> Option<u32> {
            self.threads.lock().insert(thread::current().id());
            if self.fail_start.load(Ordering::SeqCst) {
                return None;
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            Some(*entity)
        }

        fn probe(&self, _handle: &mut u32) -> bool {
            self.done.load(Ordering::SeqCst)
        }

        fn stop(&self, entity: u32, _handle: u32, end: TaskEnd) {
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.stops.lock().push((entity, end));
        }
    }

    fn config(max_threads: usize, default_timeout_ms: u64) -> WorkerConfig {
        WorkerConfig {
            max_threads,
            default_timeout_ms,
            ..WorkerConfig::default()
        }
    }

    fn wait_for(what: &str, f: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn bounded_pool_runs_every_task() {
        let rec = Arc::new(Recorder::default());
        rec.done.store(true, Ordering::SeqCst);
        let worker = BackgroundWorker::new(&config(2, 0), Arc::clone(&rec));

        for i in 0..5 {
            worker.push(i, "batch", None).unwrap();
            assert!(worker.thread_count() <= 2);
        }
        wait_for("all stops", || rec.stops.lock().len() == 5);

        assert!(rec.max_running.load(Ordering::SeqCst) <= 2);
        assert!(rec.threads.lock().len() <= 2);
        assert_eq!(rec.starts.load(Ordering::SeqCst), 5);
        assert!(rec.stops.lock().iter().all(|(_, end)| *end == TaskEnd::Completed));
        wait_for("uncompleted drained", || worker.uncompleted() == 0);
    }

    #[test]
    fn deadline_times_task_out() {
        let rec = Arc::new(Recorder::default());
        let worker = BackgroundWorker::new(&config(1, 0), Arc::clone(&rec));

        worker.push(7, "slow", Some(Duration::from_millis(30))).unwrap();
        wait_for("timeout", || !rec.stops.lock().is_empty());
        assert_eq!(rec.stops.lock()[0], (7, TaskEnd::TimedOut));
    }

    #[test]
    fn default_timeout_applies_when_unspecified() {
        let rec = Arc::new(Recorder::default());
        let worker = BackgroundWorker::new(&config(1, 20), Arc::clone(&rec));

        worker.push(1, "slow", None).unwrap();
        wait_for("default timeout", || !rec.stops.lock().is_empty());
        assert_eq!(rec.stops.lock()[0].1, TaskEnd::TimedOut);
    }

    #[test]
    fn cancel_only_hits_matching_id() {
        let rec = Arc::new(Recorder::default());
        let worker = BackgroundWorker::new(&config(2, 0), Arc::clone(&rec));

        worker.push(1, "a", None).unwrap();
        worker.push(2, "b", None).unwrap();
        wait_for("both started", || rec.starts.load(Ordering::SeqCst) == 2);

        worker.cancel(Some(&"a"));
        wait_for("a stopped", || !rec.stops.lock().is_empty());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(*rec.stops.lock(), vec![(1, TaskEnd::Cancelled)]);
        assert_eq!(worker.uncompleted(), 1);

        worker.cancel(None);
        wait_for("b stopped", || rec.stops.lock().len() == 2);
        assert_eq!(rec.stops.lock()[1], (2, TaskEnd::Cancelled));
    }

    #[test]
    fn cancel_drops_queued_tasks() {
        let rec = Arc::new(Recorder::default());
        let worker = BackgroundWorker::new(&config(1, 0), Arc::clone(&rec));

        worker.push(1, "busy", None).unwrap();
        wait_for("first started", || rec.starts.load(Ordering::SeqCst) == 1);
        worker.push(2, "queued", None).unwrap();
        worker.push(3, "queued", None).unwrap();
        assert_eq!(worker.uncompleted(), 3);

        worker.cancel(Some(&"queued"));
        assert_eq!(worker.uncompleted(), 1);
        rec.done.store(true, Ordering::SeqCst);
        worker.request_probe();
        wait_for("busy completed", || rec.stops.lock().len() == 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rec.starts.load(Ordering::SeqCst), 1);
        assert_eq!(*rec.stops.lock(), vec![(1, TaskEnd::Completed)]);
    }

    #[test]
    fn probe_request_wakes_running_task() {
        let rec = Arc::new(Recorder::default());
        let worker = BackgroundWorker::new(&config(1, 0), Arc::clone(&rec));

        worker.push(5, "p", None).unwrap();
        wait_for("started", || rec.starts.load(Ordering::SeqCst) == 1);
        worker.request_probe();
        thread::sleep(Duration::from_millis(20));
        assert!(rec.stops.lock().is_empty());

        rec.done.store(true, Ordering::SeqCst);
        worker.request_probe();
        wait_for("completed", || rec.stops.lock().len() == 1);
        assert_eq!(rec.stops.lock()[0], (5, TaskEnd::Completed));
    }

    #[test]
    fn failed_start_completes_without_stop() {
        let rec = Arc::new(Recorder::default());
        rec.fail_start.store(true, Ordering::SeqCst);
        let worker = BackgroundWorker::new(&config(1, 0), Arc::clone(&rec));

        worker.push(1, "x", None).unwrap();
        wait_for("drained", || worker.uncompleted() == 0);
        assert!(rec.stops.lock().is_empty());
    }

    #[test]
    fn drop_waits_for_threads_and_silences_callbacks() {
        let rec = Arc::new(Recorder::default());
        let worker = BackgroundWorker::new(&config(2, 0), Arc::clone(&rec));
        for i in 0..4 {
            worker.push(i, "x", None).unwrap();
        }
        drop(worker);

        let starts = rec.starts.load(Ordering::SeqCst);
        let stops = rec.stops.lock().len();
        assert_eq!(starts, stops);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(rec.starts.load(Ordering::SeqCst), starts);
        assert_eq!(rec.stops.lock().len(), stops);
    }

    #[test]
    fn idle_threads_retire() {
        let rec = Arc::new(Recorder::default());
        rec.done.store(true, Ordering::SeqCst);
        let worker = BackgroundWorker::new(
            &WorkerConfig { max_threads: 1, idle_timeout_ms: 20, ..WorkerConfig::default() },
            Arc::clone(&rec),
        );
        worker.push(1, "x", None).unwrap();
        wait_for("completed", || rec.stops.lock().len() == 1);
        wait_for("thread retired", || worker.thread_count() == 0);

        worker.push(2, "x", None).unwrap();
        wait_for("respawned and completed", || rec.stops.lock().len() == 2);
    }
}
