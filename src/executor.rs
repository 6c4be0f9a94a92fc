//! Background task executor.
//!
//! One long-lived worker thread per [`Executor`] runs dataset tasks in FIFO dispatch order.
//! Callers get a [`Pending`] handle per task, keyed by a correlation id, and decide when to block
//! on it. Timeouts release the caller only: the worker still finishes the task, and a response
//! that lands past the caller's deadline is turned into [`TaskError::Timeout`] or dropped if the
//! caller already gave up. Every handle reports how long the runner spent on its task.
//!
//! If the worker panics, every pending call is rejected with [`TaskError::WorkerCrashed`]. The
//! next call either spawns a fresh worker or, with respawn disabled, runs inline. Inline
//! execution uses the same [`TaskRunner`](crate::TaskRunner), so its output matches the worker's.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde_json::Value;

use crate::error::{Result, TaskError};
use crate::ops::{Predicate, SearchHit, SearchQuery, SortSpec, Task, TaskOutput, TransformOp};
use crate::{ExecutorOptions, ExecutorState, TaskRunner};

type Reply = Sender<Result<(TaskOutput, Duration)>>;

struct Request {
    id: u64,
    task: Task,
}

/// A caller waiting on an offloaded task.
struct Waiter {
    reply: Reply,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl Waiter {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }

    fn time_out(self, id: u64) {
        let _ = self.reply.send(Err(TaskError::Timeout {
            id,
            timeout: self.timeout,
        }));
    }
}

/// State shared between one worker thread and the handles waiting on it.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Waiter>>,
    closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Waiter>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers `id` and queues its task under one lock, so a close cannot land in between.
    ///
    /// Hands the task back when the worker is closed or gone.
    fn submit(
        &self,
        tx: &Sender<Request>,
        id: u64,
        waiter: Waiter,
        task: Task,
    ) -> core::result::Result<(), Task> {
        let mut pending = self.lock();
        if self.is_closed() {
            return Err(task);
        }
        match tx.send(Request { id, task }) {
            Ok(()) => {
                pending.insert(id, waiter);
                Ok(())
            }
            Err(mpsc::SendError(Request { task, .. })) => Err(task),
        }
    }

    /// Answers `id`. A response past the caller's deadline is turned into a timeout.
    fn resolve(&self, id: u64, output: TaskOutput, duration: Duration) {
        let Some(waiter) = self.lock().remove(&id) else {
            vtrace!(id, "executor: late response discarded");
            return;
        };
        if waiter.is_expired(Instant::now()) {
            vdebug!(id, ?duration, "executor: response arrived past deadline");
            waiter.time_out(id);
        } else {
            let _ = waiter.reply.send(Ok((output, duration)));
        }
    }

    /// Rejects every waiter whose deadline passed and returns how many remain.
    fn expire(&self, now: Instant) -> usize {
        let mut pending = self.lock();
        let expired: Vec<u64> = pending
            .iter()
            .filter(|(_, w)| w.is_expired(now))
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            if let Some(waiter) = pending.remove(&id) {
                waiter.time_out(id);
            }
        }
        pending.len()
    }

    fn abandon(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Closes the worker and rejects every pending call.
    fn close(&self, error: impl Fn(u64) -> TaskError) {
        let mut pending = self.lock();
        self.closed.store(true, Ordering::Release);
        for (id, waiter) in pending.drain() {
            let _ = waiter.reply.send(Err(error(id)));
        }
    }
}

/// Rejects everything pending when the worker thread unwinds.
struct CrashGuard {
    shared: Arc<Shared>,
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            vwarn!("executor: worker crashed");
            self.shared.close(|id| TaskError::WorkerCrashed { id });
        }
    }
}

fn worker_loop(rx: Receiver<Request>, shared: Arc<Shared>, runner: TaskRunner) {
    let _guard = CrashGuard {
        shared: Arc::clone(&shared),
    };
    while let Ok(Request { id, task }) = rx.recv() {
        let started = Instant::now();
        let output = runner(&task);
        let duration = started.elapsed();
        vtrace!(id, kind = ?task.kind(), ?duration, "executor: task done");
        shared.resolve(id, output, duration);
    }
}

struct Worker {
    tx: Sender<Request>,
    handle: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl Worker {
    fn spawn(runner: TaskRunner, generation: u64) -> Option<Self> {
        let (tx, rx) = mpsc::channel::<Request>();
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("vlist-worker-{generation}"))
            .spawn(move || worker_loop(rx, worker_shared, runner))
            .ok()?;
        vdebug!(generation, "executor: worker spawned");
        Some(Self { tx, handle, shared })
    }

    fn is_crashed(&self) -> bool {
        self.shared.is_closed()
    }
}

type Extract<T> = fn(TaskOutput) -> Result<T>;

type Received = core::result::Result<Result<(TaskOutput, Duration)>, RecvTimeoutError>;

/// Handle to one outstanding task.
///
/// Dropping an unresolved handle abandons the call; the worker's eventual response is discarded.
#[must_use = "a task result is only observable through its Pending handle"]
pub struct Pending<T> {
    id: u64,
    rx: Receiver<Result<(TaskOutput, Duration)>>,
    deadline: Option<(Instant, Duration)>,
    shared: Option<Arc<Shared>>,
    extract: Extract<T>,
}

impl<T> Pending<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the task runs on the worker (as opposed to having completed inline).
    pub fn is_offloaded(&self) -> bool {
        self.shared.is_some()
    }

    /// Blocks until the task resolves or its deadline passes.
    pub fn wait(self) -> Result<T> {
        self.wait_timed().map(|(value, _)| value)
    }

    /// Like [`Self::wait`], also returning how long the runner spent on the task.
    pub fn wait_timed(self) -> Result<(T, Duration)> {
        let received = match self.deadline {
            Some((started, timeout)) => {
                let remaining = timeout.saturating_sub(started.elapsed());
                self.rx.recv_timeout(remaining)
            }
            None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        self.finish(received).map(|(value, duration)| {
            vtrace!(id = self.id, ?duration, "executor: task resolved");
            (value, duration)
        })
    }

    /// Non-blocking poll. `None` while the task is still running within its deadline.
    ///
    /// Returns `Some` once; later polls report [`TaskError::Shutdown`].
    pub fn try_wait(&mut self) -> Option<Result<T>> {
        let received = match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Disconnected) => Err(RecvTimeoutError::Disconnected),
            Err(TryRecvError::Empty) => match self.deadline {
                Some((started, timeout)) if started.elapsed() >= timeout => {
                    Err(RecvTimeoutError::Timeout)
                }
                _ => return None,
            },
        };
        Some(self.finish(received).map(|(value, _)| value))
    }

    fn finish(&self, received: Received) -> Result<(T, Duration)> {
        match received {
            Ok(result) => {
                let (output, duration) = result?;
                (self.extract)(output).map(|value| (value, duration))
            }
            Err(RecvTimeoutError::Timeout) => {
                let timeout = self.deadline.map(|(_, t)| t).unwrap_or_default();
                if let Some(shared) = &self.shared {
                    shared.abandon(self.id);
                }
                vdebug!(id = self.id, ?timeout, "executor: task timed out");
                Err(TaskError::Timeout {
                    id: self.id,
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(TaskError::Shutdown { id: self.id }),
        }
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.abandon(self.id);
        }
    }
}

impl<T> core::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pending")
            .field("id", &self.id)
            .field("offloaded", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

fn any_output(out: TaskOutput) -> Result<TaskOutput> {
    Ok(out)
}

fn items_output(out: TaskOutput) -> Result<Vec<Value>> {
    match out {
        TaskOutput::Items(items) => Ok(items),
        other => Err(TaskError::UnexpectedOutput {
            expected: "items",
            found: other.kind_name(),
        }),
    }
}

fn hits_output(out: TaskOutput) -> Result<Vec<SearchHit>> {
    match out {
        TaskOutput::Hits(hits) => Ok(hits),
        other => Err(TaskError::UnexpectedOutput {
            expected: "hits",
            found: other.kind_name(),
        }),
    }
}

/// Runs dataset tasks on a worker thread, or inline when no worker is available.
///
/// Caller-owned; each instance has its own worker.
pub struct Executor {
    options: ExecutorOptions,
    worker: Option<Worker>,
    state: ExecutorState,
    next_id: u64,
    generation: u64,
}

impl Executor {
    pub fn new(options: ExecutorOptions) -> Self {
        let mut executor = Self {
            options,
            worker: None,
            state: ExecutorState::FallbackOnly,
            next_id: 0,
            generation: 0,
        };
        if executor.options.use_worker {
            executor.spawn_worker();
        }
        executor
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn state(&self) -> ExecutorState {
        match (&self.worker, self.state) {
            (Some(w), ExecutorState::WorkerReady) if w.is_crashed() => ExecutorState::Crashed,
            (_, state) => state,
        }
    }

    /// Whether tasks currently go to a live worker thread.
    pub fn has_worker_support(&self) -> bool {
        self.state() == ExecutorState::WorkerReady
    }

    /// Number of offloaded calls still waiting for a response within their deadline.
    ///
    /// Calls past their deadline are rejected with [`TaskError::Timeout`] and no longer count.
    pub fn pending_count(&self) -> usize {
        self.worker
            .as_ref()
            .map_or(0, |w| w.shared.expire(Instant::now()))
    }

    /// Dispatches `task`. `timeout: None` uses [`ExecutorOptions::default_timeout`].
    pub fn execute(&mut self, task: Task, timeout: Option<Duration>) -> Pending<TaskOutput> {
        self.dispatch(task, timeout, any_output)
    }

    pub fn transform(
        &mut self,
        items: impl Into<Arc<[Value]>>,
        op: TransformOp,
        timeout: Option<Duration>,
    ) -> Pending<Vec<Value>> {
        let task = Task::Transform {
            items: items.into(),
            op,
        };
        self.dispatch(task, timeout, items_output)
    }

    pub fn search(
        &mut self,
        items: impl Into<Arc<[Value]>>,
        query: SearchQuery,
        timeout: Option<Duration>,
    ) -> Pending<Vec<SearchHit>> {
        let task = Task::Search {
            items: items.into(),
            query,
        };
        self.dispatch(task, timeout, hits_output)
    }

    pub fn filter(
        &mut self,
        items: impl Into<Arc<[Value]>>,
        predicate: Predicate,
        timeout: Option<Duration>,
    ) -> Pending<Vec<Value>> {
        let task = Task::Filter {
            items: items.into(),
            predicate,
        };
        self.dispatch(task, timeout, items_output)
    }

    pub fn sort(
        &mut self,
        items: impl Into<Arc<[Value]>>,
        spec: SortSpec,
        timeout: Option<Duration>,
    ) -> Pending<Vec<Value>> {
        let task = Task::Sort {
            items: items.into(),
            spec,
        };
        self.dispatch(task, timeout, items_output)
    }

    /// Applies an arbitrary closure on the calling thread.
    ///
    /// Closures never cross to the worker; offloaded work must be expressed as a [`TransformOp`].
    pub fn transform_inline(&self, items: &[Value], f: impl Fn(&Value) -> Value) -> Vec<Value> {
        items.iter().map(f).collect()
    }

    /// Stops the worker and rejects every pending call with [`TaskError::Shutdown`].
    ///
    /// Later calls run inline.
    pub fn destroy(&mut self) {
        if let Some(worker) = self.worker.take() {
            let Worker { tx, handle, shared } = worker;
            drop(tx);
            shared.close(|id| TaskError::Shutdown { id });
            if handle.is_finished() {
                let _ = handle.join();
            }
            // A worker still busy with a task finishes it and exits on the closed channel.
        }
        self.state = ExecutorState::Destroyed;
        vdebug!("executor: destroyed");
    }

    fn spawn_worker(&mut self) {
        self.generation += 1;
        match Worker::spawn(Arc::clone(&self.options.runner), self.generation) {
            Some(worker) => {
                self.worker = Some(worker);
                self.state = ExecutorState::WorkerReady;
            }
            None => {
                vwarn!("executor: worker thread unavailable, running inline");
                self.worker = None;
                self.state = ExecutorState::FallbackOnly;
            }
        }
    }

    /// Drops a crashed worker and respawns or degrades per options.
    fn recover(&mut self) {
        let crashed = self.worker.as_ref().is_some_and(Worker::is_crashed);
        if !crashed {
            return;
        }
        self.worker = None;
        if self.options.respawn_on_crash {
            vdebug!("executor: respawning worker");
            self.spawn_worker();
        } else {
            self.state = ExecutorState::Crashed;
        }
    }

    fn dispatch<T>(
        &mut self,
        task: Task,
        timeout: Option<Duration>,
        extract: Extract<T>,
    ) -> Pending<T> {
        self.next_id += 1;
        let id = self.next_id;
        self.recover();

        let (reply, rx) = mpsc::channel();
        let task = match &self.worker {
            Some(worker) => {
                let timeout = timeout.unwrap_or(self.options.default_timeout);
                let started = Instant::now();
                let waiter = Waiter {
                    reply: reply.clone(),
                    deadline: started.checked_add(timeout),
                    timeout,
                };
                match worker.shared.submit(&worker.tx, id, waiter, task) {
                    Ok(()) => {
                        return Pending {
                            id,
                            rx,
                            deadline: Some((started, timeout)),
                            shared: Some(Arc::clone(&worker.shared)),
                            extract,
                        };
                    }
                    // Closed or gone; nothing was registered.
                    Err(task) => task,
                }
            }
            None => task,
        };
        self.run_inline(id, task, reply, rx, extract)
    }

    fn run_inline<T>(
        &self,
        id: u64,
        task: Task,
        reply: Reply,
        rx: Receiver<Result<(TaskOutput, Duration)>>,
        extract: Extract<T>,
    ) -> Pending<T> {
        vtrace!(id, kind = ?task.kind(), "executor: running inline");
        let started = Instant::now();
        let output = (self.options.runner)(&task);
        let _ = reply.send(Ok((output, started.elapsed())));
        Pending {
            id,
            rx,
            deadline: None,
            shared: None,
            extract,
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.destroy();
        }
    }
}

impl core::fmt::Debug for Executor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Executor")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
