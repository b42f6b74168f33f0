//! TaskNode: one stage of the processing graph and its scheduling state.
//!
//! A node owns its stage, its stream handlers and (while prepared) a
//! `ContextPool`. Two independent axes describe it at any instant:
//!
//! - **Scheduling state** (`SchedulingCell`): which thread, if any, is running
//!   the node's scheduling pass, and whether a wake-up arrived during it.
//! - **Lifecycle status** (`StatusCell`): Uninitialized → Prepared →
//!   Opened/Active → Closed, reset to Uninitialized by `cleanup_after_run`.
//!
//! Wake-ups enter through `check_if_became_ready`. The winner of
//! `try_to_begin_scheduling` hands the node to its `SchedulerQueue`, whose
//! worker runs `scheduling_loop`. The pass leases ready contexts while the
//! in-flight counter is below `max_in_scheduling`, hands each lease out as an
//! `Invocation`, and ends with `end_scheduling`, looping again if another
//! thread left a pending mark.
//!
//! Fallbacks:
//! - no scheduler queue assigned: the pass runs on the waking thread.
//! - no invocation channel in `RunHooks`: invocations run inside the pass.

use crate::task::buffer::MediaBuffer;
use crate::task::context::{InvocationContext, DEFAULT_MAX_BATCH_SIZE};
use crate::task::context_pool::{ContextLease, ContextPool};
use crate::task::error::{TaskError, TaskResult};
use crate::task::events::{NodeEvent, QueueEvent, RunHooks};
use crate::task::id::NodeId;
use crate::task::options::{NodeOptions, KEY_MAX_BATCH_SIZE, KEY_MAX_IN_SCHEDULING};
use crate::task::scheduler::{Invocation, SchedulerQueue};
use crate::task::stage::AnyStage;
use crate::task::state::{NodeStatus, SchedulingCell, SchedulingState, StatusCell};
use crate::task::stream::{InputStreamHandler, OutputStream, OutputStreamHandler, StreamInfo};
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Upper bound on one sleep while waiting for invocations to drain.
const IN_FLIGHT_RECHECK: Duration = Duration::from_millis(10);

thread_local! {
    /// Address of the node whose `process` is running on this thread.
    static PROCESSING: Cell<usize> = const { Cell::new(0) };
}

/// An upstream output stream feeding one of this node's inputs.
struct StreamSource {
    provider: Arc<OutputStream>,
    input_index: usize,
}

/// Counters accumulated over a node's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    /// Scheduling passes started.
    pub passes: u64,
    /// Calls into the stage's `process`.
    pub invocations: u64,
    /// `process` calls that returned an error.
    pub failures: u64,
}

pub struct TaskNodeBuilder {
    id: NodeId,
    name: String,
    stage: AnyStage,
    inputs: Option<Vec<StreamInfo>>,
    outputs: Option<Vec<StreamInfo>>,
    max_in_scheduling: usize,
    max_batch_size: usize,
}

impl TaskNodeBuilder {
    /// Declare the input streams. An empty list makes a source node.
    pub fn inputs(mut self, infos: Vec<StreamInfo>) -> Self {
        self.inputs = Some(infos);
        self
    }

    /// Declare the output streams. An empty list makes a sink node.
    pub fn outputs(mut self, infos: Vec<StreamInfo>) -> Self {
        self.outputs = Some(infos);
        self
    }

    pub fn max_in_scheduling(mut self, max: usize) -> Self {
        self.max_in_scheduling = max;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn build(self) -> Arc<TaskNode> {
        let input = self.inputs.map(|infos| InputStreamHandler::new(self.id, infos));
        let output = self
            .outputs
            .map(|infos| OutputStreamHandler::new(self.id, infos));
        Arc::new(TaskNode {
            id: self.id,
            name: Arc::from(self.name),
            stage: self.stage,
            input,
            output,
            scheduling: SchedulingCell::new(),
            status: StatusCell::new(),
            closing: AtomicBool::new(false),
            current_in_scheduling: AtomicUsize::new(0),
            max_in_scheduling: AtomicUsize::new(self.max_in_scheduling),
            max_batch_size: AtomicUsize::new(self.max_batch_size),
            drained_lock: Mutex::new(()),
            drained: Condvar::new(),
            pool: RwLock::new(None),
            options: RwLock::new(Arc::new(NodeOptions::new())),
            hooks: RwLock::new(RunHooks::new()),
            queue_observer: RwLock::new(None),
            scheduler_queue: RwLock::new(None),
            stream_sources: Mutex::new(Vec::new()),
            passes: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }
}

pub struct TaskNode {
    id: NodeId,
    name: Arc<str>,
    stage: AnyStage,
    input: Option<InputStreamHandler>,
    output: Option<OutputStreamHandler>,

    scheduling: SchedulingCell,
    status: StatusCell,
    /// Set once `close_node` starts; the pass stops leasing contexts.
    closing: AtomicBool,

    current_in_scheduling: AtomicUsize,
    max_in_scheduling: AtomicUsize,
    max_batch_size: AtomicUsize,
    // Signalled when an invocation retires while closing.
    drained_lock: Mutex<()>,
    drained: Condvar,

    // Per-run state, populated by `prepare_for_run`.
    pool: RwLock<Option<Arc<ContextPool>>>,
    options: RwLock<Arc<NodeOptions>>,
    hooks: RwLock<RunHooks>,
    queue_observer: RwLock<Option<Sender<QueueEvent>>>,
    scheduler_queue: RwLock<Option<Weak<dyn SchedulerQueue>>>,

    stream_sources: Mutex<Vec<StreamSource>>,

    passes: AtomicU64,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl TaskNode {
    pub fn builder(id: NodeId, name: impl Into<String>, stage: impl Into<AnyStage>) -> TaskNodeBuilder {
        TaskNodeBuilder {
            id,
            name: name.into(),
            stage: stage.into(),
            inputs: None,
            outputs: None,
            max_in_scheduling: 1,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    // ── Identity & topology queries ──

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> &AnyStage {
        &self.stage
    }

    pub fn num_input_streams(&self) -> usize {
        self.input.as_ref().map_or(0, InputStreamHandler::num_streams)
    }

    pub fn num_output_streams(&self) -> usize {
        self.output.as_ref().map_or(0, OutputStreamHandler::num_streams)
    }

    /// No upstream input: readiness comes from being `Active`.
    pub fn is_source(&self) -> bool {
        self.num_input_streams() == 0
    }

    pub fn is_sink(&self) -> bool {
        self.num_output_streams() == 0
    }

    pub fn input_handler(&self) -> Option<&InputStreamHandler> {
        self.input.as_ref()
    }

    pub fn output_stream(&self, index: usize) -> Option<&Arc<OutputStream>> {
        self.output.as_ref().and_then(|h| h.stream(index))
    }

    pub fn output_stream_by_name(&self, name: &str) -> Option<&Arc<OutputStream>> {
        self.output.as_ref().and_then(|h| h.stream_by_name(name))
    }

    // ── Status queries ──

    pub fn status(&self) -> NodeStatus {
        self.status.get()
    }

    pub fn scheduling_state(&self) -> SchedulingState {
        self.scheduling.get()
    }

    pub fn closed(&self) -> bool {
        self.status() == NodeStatus::Closed
    }

    pub fn current_in_scheduling(&self) -> usize {
        self.current_in_scheduling.load(Ordering::Acquire)
    }

    pub fn max_in_scheduling(&self) -> usize {
        self.max_in_scheduling.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            passes: self.passes.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Whether the node has nothing left to do this run.
    ///
    /// Sources are done once every output is closed. Other nodes are done
    /// once every input is closed and drained, no context holds input and no
    /// invocation is in flight.
    pub fn is_done(&self) -> bool {
        if self.closed() {
            return true;
        }
        if self.is_source() {
            return self
                .output
                .as_ref()
                .is_some_and(|h| h.streams().iter().all(|s| s.is_closed()));
        }
        let drained = self
            .input
            .as_ref()
            .is_some_and(InputStreamHandler::all_closed_and_drained);
        let staged = self
            .pool()
            .is_some_and(|p| p.contexts().iter().any(|c| c.total_queued() > 0));
        drained && !staged && self.current_in_scheduling() == 0
    }

    fn pool(&self) -> Option<Arc<ContextPool>> {
        self.pool.read().clone()
    }

    fn is_runnable(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && self.status().is_runnable()
    }

    // ── Settings ──

    /// Concurrency limit applied at the next `prepare_for_run`.
    pub fn set_max_in_scheduling(&self, max: usize) -> TaskResult<()> {
        if max < 1 {
            return Err(TaskError::Config(format!(
                "{}: max_in_scheduling must be >= 1",
                self.id
            )));
        }
        self.max_in_scheduling.store(max, Ordering::Relaxed);
        Ok(())
    }

    /// Batch limit for every context, effective immediately.
    pub fn set_max_batch_process_size(&self, size: usize) {
        let size = size.max(1);
        self.max_batch_size.store(size, Ordering::Relaxed);
        if let Some(pool) = self.pool() {
            pool.set_max_batch_size(size);
        }
    }

    pub fn set_max_input_stream_queue_size(&self, size: usize) {
        if let Some(input) = &self.input {
            input.set_max_queue_size(size);
        }
    }

    /// Relay queue-depth transitions to `observer`, from the next run on.
    pub fn set_queue_size_observer(&self, observer: Option<Sender<QueueEvent>>) {
        *self.queue_observer.write() = observer;
    }

    pub fn set_scheduler_queue<Q: SchedulerQueue + 'static>(&self, queue: &Arc<Q>) {
        let queue: Arc<dyn SchedulerQueue> = queue.clone();
        *self.scheduler_queue.write() = Some(Arc::downgrade(&queue));
    }

    pub fn clear_scheduler_queue(&self) {
        *self.scheduler_queue.write() = None;
    }

    /// The queue this node is assigned to, if it is still alive.
    pub fn scheduler_queue(&self) -> Option<Arc<dyn SchedulerQueue>> {
        self.scheduler_queue.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn options(&self) -> Arc<NodeOptions> {
        Arc::clone(&self.options.read())
    }

    pub fn get_default_node_context(&self) -> Option<Arc<InvocationContext>> {
        self.pool().and_then(|p| p.default_context())
    }

    // ── Upstream topology ──

    /// Connect `provider` to input `index` (the first input when `None`).
    ///
    /// Adding the same provider twice is a no-op.
    pub fn add_stream_source(
        self: &Arc<Self>,
        index: Option<usize>,
        provider: &Arc<OutputStream>,
    ) -> TaskResult<()> {
        let input_index = index.unwrap_or(0);
        if input_index >= self.num_input_streams() {
            return Err(TaskError::UnknownStream(format!(
                "{} has no input #{}",
                self.id, input_index
            )));
        }

        let mut sources = self.stream_sources.lock();
        if sources.iter().any(|s| Arc::ptr_eq(&s.provider, provider)) {
            return Ok(());
        }
        provider.add_consumer(self, input_index);
        sources.push(StreamSource {
            provider: Arc::clone(provider),
            input_index,
        });
        tracing::debug!(
            "{} input #{} fed by {} '{}'",
            self.id,
            input_index,
            provider.owner(),
            provider.info().name
        );
        Ok(())
    }

    /// Disconnect `provider`. Unknown providers are ignored.
    pub fn remove_stream_source(&self, provider: &Arc<OutputStream>) {
        let mut sources = self.stream_sources.lock();
        let before = sources.len();
        sources.retain(|s| !Arc::ptr_eq(&s.provider, provider));
        if sources.len() != before {
            provider.remove_consumer(self.id);
        }
    }

    /// Ids of the nodes feeding this one, without duplicates.
    pub fn get_stream_source(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .stream_sources
            .lock()
            .iter()
            .map(|s| s.provider.owner())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Input index each upstream provider is connected to.
    pub fn stream_source_inputs(&self) -> Vec<(NodeId, usize)> {
        self.stream_sources
            .lock()
            .iter()
            .map(|s| (s.provider.owner(), s.input_index))
            .collect()
    }

    // ── Lifecycle ──

    /// Uninitialized → Prepared.
    ///
    /// `options` may override `max_in_scheduling` and `max_batch_size`.
    pub fn prepare_for_run(self: &Arc<Self>, options: NodeOptions, hooks: RunHooks) -> TaskResult<()> {
        let status = self.status();
        if status != NodeStatus::Uninitialized {
            return Err(TaskError::InvalidState(format!(
                "{} cannot be prepared from {:?}",
                self.id, status
            )));
        }
        if self.input.is_none() && self.output.is_none() {
            return Err(TaskError::Config(format!(
                "{} '{}' has no stream handlers",
                self.id, self.name
            )));
        }

        let max_in_scheduling = match options.get_int(KEY_MAX_IN_SCHEDULING) {
            Some(v) => usize::try_from(v).unwrap_or(0),
            None => self.max_in_scheduling(),
        };
        if max_in_scheduling < 1 {
            return Err(TaskError::Config(format!(
                "{} '{}': max_in_scheduling must be >= 1",
                self.id, self.name
            )));
        }
        let max_batch_size = match options.get_int(KEY_MAX_BATCH_SIZE) {
            Some(v) => usize::try_from(v).unwrap_or(0),
            None => self.max_batch_size.load(Ordering::Relaxed),
        };
        if max_batch_size < 1 {
            return Err(TaskError::Config(format!(
                "{} '{}': max_batch_size must be >= 1",
                self.id, self.name
            )));
        }

        self.max_in_scheduling.store(max_in_scheduling, Ordering::Relaxed);
        self.max_batch_size.store(max_batch_size, Ordering::Relaxed);

        let options = Arc::new(options);
        let pool = ContextPool::new(
            self.id,
            Arc::clone(&self.name),
            self.input.as_ref().map(InputStreamHandler::infos).unwrap_or_default(),
            self.output
                .as_ref()
                .map(|h| h.streams().to_vec())
                .unwrap_or_default(),
            Arc::clone(&options),
            max_in_scheduling,
            max_batch_size,
        );

        if let Some(input) = &self.input {
            input.set_observer(self.queue_observer.read().clone());
        }
        if let Some(output) = &self.output {
            output.reopen_all();
        }
        *self.options.write() = options;
        *self.hooks.write() = hooks;
        *self.pool.write() = Some(pool);

        self.status
            .transition(NodeStatus::Uninitialized, NodeStatus::Prepared)
            .map_err(|found| {
                TaskError::InvalidState(format!("{} changed to {:?} while preparing", self.id, found))
            })?;
        tracing::debug!(
            "{} '{}' prepared (max_in_scheduling: {}, batch: {})",
            self.id,
            self.name,
            max_in_scheduling,
            max_batch_size
        );
        Ok(())
    }

    /// Run the stage's open step with the default context, then `node_opened`.
    pub fn open_node(self: &Arc<Self>) -> TaskResult<()> {
        let ctx = self.get_default_node_context().ok_or_else(|| {
            TaskError::InvalidState(format!("{} opened before prepare_for_run", self.id))
        })?;
        self.stage.open(&ctx)?;
        self.node_opened()
    }

    /// Prepared → Active (sources) or Opened (everything else).
    pub fn node_opened(self: &Arc<Self>) -> TaskResult<()> {
        let target = if self.is_source() {
            NodeStatus::Active
        } else {
            NodeStatus::Opened
        };
        self.status
            .transition(NodeStatus::Prepared, target)
            .map_err(|found| {
                TaskError::InvalidState(format!("{} cannot open from {:?}", self.id, found))
            })?;
        tracing::info!("{} '{}' {:?}", self.id, self.name, target);

        if self.is_source() {
            self.hooks.read().notify(NodeEvent::SourceOpened(self.id));
        } else if self.input.as_ref().is_some_and(InputStreamHandler::has_pending) {
            // Input that arrived while the node was only prepared.
            self.check_if_became_ready();
        }
        Ok(())
    }

    /// Opened/Active → Closed. Repeated or premature calls succeed as no-ops.
    ///
    /// Blocks until every invocation already handed out has returned, so the
    /// stage's close step never overlaps its `process` on the same context.
    /// Invocations that have not started by then skip `process`. When called
    /// from inside this node's own `process`, that context is closed as soon
    /// as the call returns.
    pub fn close_node(&self) -> TaskResult<()> {
        let status = self.status();
        if matches!(status, NodeStatus::Closed | NodeStatus::Uninitialized) {
            return Ok(());
        }
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_error = None;
        if status.is_runnable() {
            self.wait_for_in_flight();
            if let Some(pool) = self.pool() {
                for ctx in pool.begin_close() {
                    if let Err(e) = self.close_context(&ctx) {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        self.close_input_streams();
        self.close_output_streams();
        self.status.set(NodeStatus::Closed);
        self.hooks.read().notify(NodeEvent::Closed(self.id));
        tracing::info!("{} '{}' closed", self.id, self.name);

        first_error.map_or(Ok(()), Err)
    }

    fn close_context(&self, ctx: &InvocationContext) -> TaskResult<()> {
        self.stage.close(ctx).map_err(|e| {
            tracing::warn!("{} close failed on context #{}: {}", self.id, ctx.slot(), e);
            e
        })
    }

    fn is_processing_here(&self) -> bool {
        PROCESSING.with(|p| p.get() == self as *const Self as usize)
    }

    /// Block until no invocation other than the caller's own is in flight.
    fn wait_for_in_flight(&self) {
        let own = usize::from(self.is_processing_here());
        let mut guard = self.drained_lock.lock();
        while self.current_in_scheduling() > own {
            self.drained.wait_for(&mut guard, IN_FLIGHT_RECHECK);
        }
    }

    pub fn close_input_streams(&self) {
        if let Some(input) = &self.input {
            input.close_all();
        }
    }

    /// Closing an output also closes the matching input of every consumer.
    pub fn close_output_streams(&self) {
        if let Some(output) = &self.output {
            output.close_all();
        }
    }

    /// Closed → Uninitialized. A no-op unless the node is closed.
    pub fn cleanup_after_run(&self) -> TaskResult<()> {
        if !self.closed() {
            return Ok(());
        }
        self.wait_for_in_flight();
        if let Some(pool) = self.pool.write().take() {
            pool.clear();
        }
        *self.hooks.write() = RunHooks::new();
        if let Some(input) = &self.input {
            input.reset();
            input.set_observer(None);
        }
        if let Some(output) = &self.output {
            output.reopen_all();
        }
        self.closing.store(false, Ordering::Release);
        self.status.set(NodeStatus::Uninitialized);
        tracing::debug!("{} '{}' cleaned up", self.id, self.name);
        Ok(())
    }

    // ── Input side ──

    /// Queue a buffer arriving on input `index` and wake the node.
    pub fn deliver_input(self: &Arc<Self>, index: usize, buffer: MediaBuffer) -> TaskResult<()> {
        if self.closed() {
            return Err(TaskError::StreamClosed(format!("{} is closed", self.id)));
        }
        let input = self.input.as_ref().ok_or_else(|| {
            TaskError::UnknownStream(format!("{} has no input streams", self.id))
        })?;
        input.push(index, buffer)?;
        if self.is_runnable() {
            self.check_if_became_ready();
        }
        Ok(())
    }

    pub(crate) fn on_input_stream_closed(self: &Arc<Self>, index: usize) {
        if let Some(input) = &self.input {
            input.close_stream(index);
        }
        tracing::debug!("{} input #{} closed upstream", self.id, index);
        if self.is_runnable() {
            self.check_if_became_ready();
        }
    }

    // ── Scheduling ──

    /// Idle → Scheduling for exactly one caller; everyone else leaves a
    /// pending mark for the running pass.
    pub fn try_to_begin_scheduling(&self) -> bool {
        self.scheduling.try_begin()
    }

    /// Returns `true` when the pass must recheck readiness before exiting.
    pub fn end_scheduling(&self) -> bool {
        self.scheduling.end()
    }

    /// Return a pass that will never run to `Idle`.
    pub(crate) fn abandon_scheduling(&self) {
        while self.end_scheduling() {}
    }

    /// External wake-up entry point.
    pub fn check_if_became_ready(self: &Arc<Self>) {
        if !self.try_to_begin_scheduling() {
            return;
        }
        match self.scheduler_queue() {
            Some(queue) => {
                if let Err(e) = queue.add_node(Arc::clone(self)) {
                    tracing::warn!("{} could not be queued ({}), scheduling inline", self.id, e);
                    self.scheduling_loop();
                }
            }
            None => self.scheduling_loop(),
        }
    }

    /// One scheduling pass. Only the thread that won `try_to_begin_scheduling`
    /// may call this.
    pub fn scheduling_loop(self: &Arc<Self>) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        loop {
            self.drain_ready();
            if !self.end_scheduling() {
                break;
            }
        }
    }

    fn drain_ready(self: &Arc<Self>) {
        while self.is_runnable() {
            if !self.reserve_invocation() {
                return;
            }
            let Some(lease) = self.acquire_context() else {
                self.release_invocation();
                return;
            };
            self.dispatch(lease);
        }
    }

    fn reserve_invocation(&self) -> bool {
        let max = self.max_in_scheduling();
        self.current_in_scheduling
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    fn release_invocation(&self) {
        let _ = self
            .current_in_scheduling
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
        if self.closing.load(Ordering::SeqCst) {
            let _guard = self.drained_lock.lock();
            self.drained.notify_all();
        }
    }

    /// Give a lease back and free its in-flight slot, closing the context if
    /// the node started closing while it was out.
    pub(crate) fn retire_lease(&self, lease: ContextLease) {
        if let Some(ctx) = lease.finish() {
            let _ = self.close_context(&ctx);
        }
        self.release_invocation();
    }

    fn acquire_context(&self) -> Option<ContextLease> {
        let pool = self.pool()?;
        if self.is_source() {
            pool.acquire_ready(None)
        } else {
            pool.acquire_ready(Some(self.input.as_ref()?))
        }
    }

    fn dispatch(self: &Arc<Self>, lease: ContextLease) {
        let invocations = self.hooks.read().invocations.clone();
        let Some(tx) = invocations else {
            self.run_invocation(lease, false);
            return;
        };
        if let Err(e) = tx.send(Invocation::new(Arc::clone(self), lease)) {
            // Worker side is gone; the lease comes back with the error.
            if let Some(lease) = e.into_inner().into_lease() {
                self.run_invocation(lease, false);
            }
        }
    }

    /// Execute one leased invocation and return its slot.
    ///
    /// With `wake`, rechecks readiness afterward so a pass that stopped at
    /// the concurrency limit resumes.
    pub(crate) fn run_invocation(self: &Arc<Self>, lease: ContextLease, wake: bool) {
        if self.closing.load(Ordering::Acquire) {
            tracing::debug!("{} context #{} skipped, node is closing", self.id, lease.slot());
        } else {
            let previous = PROCESSING.with(|p| p.replace(Arc::as_ptr(self) as usize));
            let result = self.process_node(&lease);
            PROCESSING.with(|p| p.set(previous));
            if let Err(e) = result {
                // Not retried: the staged input for this call is discarded.
                lease.clear();
                tracing::debug!("{} context #{} cleared after failure: {}", self.id, lease.slot(), e);
            }
        }
        self.retire_lease(lease);
        if wake && self.is_runnable() {
            self.check_if_became_ready();
        }
    }

    /// Run the stage's processing step once on `ctx`.
    pub fn process_node(&self, ctx: &InvocationContext) -> TaskResult<()> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        match self.stage.process(ctx) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("{} '{}' process failed: {}", self.id, self.name, error);
                self.hooks.read().notify(NodeEvent::ProcessFailed {
                    node_id: self.id,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Out-of-band control command, forwarded to the stage.
    pub fn invoke(&self, command: &mut NodeOptions) -> TaskResult<()> {
        self.stage.invoke(command)
    }

    /// Log the node's scheduling state and every context at debug level.
    pub fn dump(&self) {
        tracing::debug!(
            "{} '{}' status {:?}, scheduling {:?}, in flight {}/{}",
            self.id,
            self.name,
            self.status(),
            self.scheduling_state(),
            self.current_in_scheduling(),
            self.max_in_scheduling()
        );
        if let Some(pool) = self.pool() {
            for ctx in pool.contexts() {
                ctx.dump();
            }
        }
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stage", &self.stage.name())
            .field("status", &self.status())
            .field("scheduling", &self.scheduling_state())
            .field("in_flight", &self.current_in_scheduling())
            .finish()
    }
}
