//! Worker threads that run scheduling passes and invocations.
//!
//! `SchedulerQueue` is the seam a node enqueues itself onto once it wins
//! `try_to_begin_scheduling`. `WorkerPool` is the stock implementation: a
//! fixed set of threads multiplexing two crossbeam channels, one carrying
//! nodes whose pass should run and one carrying prepared `Invocation`s.
//!
//! On shutdown the pool drops its receivers. Anything still queued is
//! dropped with them (passes return their node to `Idle`, invocations give
//! back their lease), and later sends fail so callers fall back to running
//! the work themselves.

use crate::task::context_pool::ContextLease;
use crate::task::error::{TaskError, TaskResult};
use crate::task::events::RunHooks;
use crate::task::node::TaskNode;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often an idle worker rechecks the running flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Accepts nodes whose scheduling pass should run on a worker thread.
///
/// The caller has already moved the node to `Scheduling`; the implementation
/// must eventually call `TaskNode::scheduling_loop` exactly once, or return
/// an error so the caller runs the pass itself.
#[cfg_attr(test, mockall::automock)]
pub trait SchedulerQueue: Send + Sync {
    fn add_node(&self, node: Arc<TaskNode>) -> TaskResult<()>;
}

/// One leased context waiting to be processed.
///
/// Dropping an `Invocation` without running it returns the context and the
/// node's in-flight slot.
pub struct Invocation {
    node: Arc<TaskNode>,
    lease: Option<ContextLease>,
}

impl Invocation {
    pub(crate) fn new(node: Arc<TaskNode>, lease: ContextLease) -> Self {
        Self {
            node,
            lease: Some(lease),
        }
    }

    pub fn node(&self) -> &Arc<TaskNode> {
        &self.node
    }

    /// Process the leased context, release it, then recheck readiness.
    pub fn run(mut self) {
        if let Some(lease) = self.lease.take() {
            self.node.run_invocation(lease, true);
        }
    }

    pub(crate) fn into_lease(mut self) -> Option<ContextLease> {
        self.lease.take()
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            tracing::debug!("{} invocation on context #{} dropped unrun", self.node.id(), lease.slot());
            self.node.retire_lease(lease);
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("node", &self.node.id())
            .field("slot", &self.lease.as_ref().map(ContextLease::slot))
            .finish()
    }
}

/// A node waiting for a worker to run its scheduling pass.
struct QueuedPass(Option<Arc<TaskNode>>);

impl QueuedPass {
    fn run(mut self) {
        if let Some(node) = self.0.take() {
            node.scheduling_loop();
        }
    }

    /// Take the node back without touching its scheduling state.
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for QueuedPass {
    fn drop(&mut self) {
        if let Some(node) = self.0.take() {
            tracing::debug!("{} pass dropped unrun", node.id());
            node.abandon_scheduling();
        }
    }
}

pub struct WorkerPool {
    passes_tx: Sender<QueuedPass>,
    passes_rx: Mutex<Option<Receiver<QueuedPass>>>,
    invocations_tx: Sender<Invocation>,
    invocations_rx: Mutex<Option<Receiver<Invocation>>>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Arc<Self>> {
        let threads = threads.max(1);
        let (passes_tx, passes_rx) = unbounded::<QueuedPass>();
        let (invocations_tx, invocations_rx) = unbounded::<Invocation>();
        let running = Arc::new(AtomicBool::new(true));

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let passes = passes_rx.clone();
            let invocations = invocations_rx.clone();
            let running = Arc::clone(&running);
            let handle = std::thread::Builder::new()
                .name(format!("mediagraph-worker-{}", index))
                .spawn(move || worker_loop(index, passes, invocations, running))?;
            handles.push(handle);
        }
        tracing::info!("Worker pool started with {} threads", threads);

        Ok(Arc::new(Self {
            passes_tx,
            passes_rx: Mutex::new(Some(passes_rx)),
            invocations_tx,
            invocations_rx: Mutex::new(Some(invocations_rx)),
            running,
            handles: Mutex::new(handles),
            threads,
        }))
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn invocation_sender(&self) -> Sender<Invocation> {
        self.invocations_tx.clone()
    }

    /// Run hooks routing a node's invocations onto this pool.
    pub fn hooks(&self) -> RunHooks {
        RunHooks::new().with_invocations(self.invocation_sender())
    }

    /// Stop the workers and drop anything still queued.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let current = std::thread::current().id();
        for handle in self.handles.lock().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
        // A send racing this shutdown is drained here, discarded when the
        // receivers drop, or fails. Each way the node is not left queued.
        let passes = self.passes_rx.lock().take();
        let invocations = self.invocations_rx.lock().take();
        let stale_passes = passes.as_ref().map_or(0, |rx| rx.try_iter().count());
        let stale_invocations = invocations.as_ref().map_or(0, |rx| rx.try_iter().count());
        drop(passes);
        drop(invocations);
        if stale_passes + stale_invocations > 0 {
            tracing::warn!(
                "Worker pool shut down with {} passes and {} invocations pending",
                stale_passes,
                stale_invocations
            );
        }
        tracing::info!("Worker pool stopped");
    }
}

impl SchedulerQueue for WorkerPool {
    fn add_node(&self, node: Arc<TaskNode>) -> TaskResult<()> {
        if !self.is_running() {
            return Err(TaskError::InvalidState("worker pool is shut down".to_string()));
        }
        self.passes_tx
            .send(QueuedPass(Some(node)))
            .map_err(|e| {
                // The caller still owns the pass and runs it inline.
                e.into_inner().disarm();
                TaskError::InvalidState("worker pool is shut down".to_string())
            })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("running", &self.is_running())
            .field("queued_passes", &self.passes_tx.len())
            .field("queued_invocations", &self.invocations_tx.len())
            .finish()
    }
}

fn worker_loop(
    index: usize,
    passes: Receiver<QueuedPass>,
    invocations: Receiver<Invocation>,
    running: Arc<AtomicBool>,
) {
    tracing::debug!("Worker {} started", index);
    while running.load(Ordering::Acquire) {
        select! {
            recv(passes) -> msg => match msg {
                Ok(pass) => pass.run(),
                Err(_) => break,
            },
            recv(invocations) -> msg => match msg {
                Ok(invocation) => invocation.run(),
                Err(_) => break,
            },
            default(IDLE_POLL) => {}
        }
    }
    tracing::debug!("Worker {} exiting", index);
}
