//! Stream descriptors and the handlers a node uses to receive and emit buffers.
//!
//! - `InputStreamHandler` holds the per-stream transit queues of a node and
//!   reports depth transitions (full / not-full / empty) to whoever observes it.
//! - `OutputStream` is the shared handle a producer writes into; it fans each
//!   buffer out to every registered downstream consumer by reference.

use crate::task::buffer::{BufferPool, MediaBuffer};
use crate::task::error::{TaskError, TaskResult};
use crate::task::events::{QueueEvent, QueueTransition};
use crate::task::id::NodeId;
use crate::task::node::TaskNode;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Default maximum queue depth before a stream reports `Full`.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 16;

/// The kind of media carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

/// Static descriptor for one stream of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub name: String,
    pub kind: StreamKind,
}

impl StreamInfo {
    pub fn new(index: usize, name: impl Into<String>, kind: StreamKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
        }
    }
}

struct InputQueue {
    info: StreamInfo,
    buffers: Mutex<VecDeque<MediaBuffer>>,
    closed: AtomicBool,
}

/// Receiving side of a node: one FIFO per input stream.
pub struct InputStreamHandler {
    node_id: NodeId,
    queues: Vec<InputQueue>,
    max_queue_size: AtomicUsize,
    observer: RwLock<Option<Sender<QueueEvent>>>,
}

impl InputStreamHandler {
    pub fn new(node_id: NodeId, infos: Vec<StreamInfo>) -> Self {
        let queues = infos
            .into_iter()
            .map(|info| InputQueue {
                info,
                buffers: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            })
            .collect();
        Self {
            node_id,
            queues,
            max_queue_size: AtomicUsize::new(DEFAULT_MAX_QUEUE_SIZE),
            observer: RwLock::new(None),
        }
    }

    pub fn num_streams(&self) -> usize {
        self.queues.len()
    }

    pub fn info(&self, index: usize) -> Option<&StreamInfo> {
        self.queues.get(index).map(|q| &q.info)
    }

    pub fn info_by_name(&self, name: &str) -> Option<&StreamInfo> {
        self.queues.iter().map(|q| &q.info).find(|i| i.name == name)
    }

    pub fn infos(&self) -> Vec<StreamInfo> {
        self.queues.iter().map(|q| q.info.clone()).collect()
    }

    pub fn set_max_queue_size(&self, size: usize) {
        self.max_queue_size.store(size.max(1), Ordering::Relaxed);
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size.load(Ordering::Relaxed)
    }

    /// Register (or clear) the observer for depth transitions.
    pub fn set_observer(&self, observer: Option<Sender<QueueEvent>>) {
        *self.observer.write() = observer;
    }

    fn queue(&self, index: usize) -> TaskResult<&InputQueue> {
        self.queues
            .get(index)
            .ok_or_else(|| TaskError::UnknownStream(format!("input #{}", index)))
    }

    /// Append a buffer to the tail of stream `index`. Returns the new depth.
    pub fn push(&self, index: usize, buffer: MediaBuffer) -> TaskResult<usize> {
        let queue = self.queue(index)?;
        if queue.closed.load(Ordering::Acquire) {
            return Err(TaskError::StreamClosed(queue.info.name.clone()));
        }
        let depth = {
            let mut buffers = queue.buffers.lock();
            buffers.push_back(buffer);
            buffers.len()
        };
        if depth == self.max_queue_size() {
            self.emit(&queue.info, depth, QueueTransition::Full);
        }
        Ok(depth)
    }

    /// Remove up to `max` buffers from the head of stream `index`, in order.
    pub fn take_up_to(&self, index: usize, max: usize) -> Vec<MediaBuffer> {
        let Some(queue) = self.queues.get(index) else {
            return Vec::new();
        };
        if max == 0 {
            return Vec::new();
        }
        let (taken, before, after) = {
            let mut buffers = queue.buffers.lock();
            let before = buffers.len();
            let n = before.min(max);
            let taken: Vec<_> = buffers.drain(..n).collect();
            (taken, before, buffers.len())
        };
        if taken.is_empty() {
            return taken;
        }
        let limit = self.max_queue_size();
        if before >= limit && after < limit {
            self.emit(&queue.info, after, QueueTransition::NotFull);
        }
        if after == 0 {
            self.emit(&queue.info, after, QueueTransition::Empty);
        }
        taken
    }

    pub fn pending(&self, index: usize) -> usize {
        self.queues.get(index).map_or(0, |q| q.buffers.lock().len())
    }

    /// Whether any stream has a buffer waiting.
    pub fn has_pending(&self) -> bool {
        self.queues.iter().any(|q| !q.buffers.lock().is_empty())
    }

    pub fn close_stream(&self, index: usize) {
        if let Some(queue) = self.queues.get(index) {
            queue.closed.store(true, Ordering::Release);
        }
    }

    pub fn close_all(&self) {
        for queue in &self.queues {
            queue.closed.store(true, Ordering::Release);
        }
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.queues
            .get(index)
            .is_some_and(|q| q.closed.load(Ordering::Acquire))
    }

    /// Every stream closed and nothing left to hand out.
    pub fn all_closed_and_drained(&self) -> bool {
        self.queues
            .iter()
            .all(|q| q.closed.load(Ordering::Acquire) && q.buffers.lock().is_empty())
    }

    /// Drop queued buffers and reopen every stream for a new run.
    pub fn reset(&self) {
        for queue in &self.queues {
            queue.buffers.lock().clear();
            queue.closed.store(false, Ordering::Release);
        }
    }

    fn emit(&self, info: &StreamInfo, depth: usize, transition: QueueTransition) {
        let guard = self.observer.read();
        if let Some(tx) = guard.as_ref() {
            let event = QueueEvent {
                node_id: self.node_id,
                stream: info.name.clone(),
                depth,
                transition,
            };
            if tx.try_send(event).is_err() {
                tracing::warn!(
                    "Dropped {:?} notification for {} stream '{}'",
                    transition,
                    self.node_id,
                    info.name
                );
            }
        }
    }
}

impl std::fmt::Debug for InputStreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStreamHandler")
            .field("node_id", &self.node_id)
            .field("streams", &self.num_streams())
            .field("max_queue_size", &self.max_queue_size())
            .finish()
    }
}

struct Consumer {
    node: Weak<TaskNode>,
    node_id: NodeId,
    input_index: usize,
}

struct PoolBinding {
    pool: BufferPool,
    timeout: Duration,
}

/// Shared output handle: one producer, any number of downstream consumers.
pub struct OutputStream {
    info: StreamInfo,
    owner: NodeId,
    consumers: RwLock<Vec<Consumer>>,
    pool: RwLock<Option<PoolBinding>>,
    closed: AtomicBool,
}

impl OutputStream {
    pub fn new(owner: NodeId, info: StreamInfo) -> Self {
        Self {
            info,
            owner,
            consumers: RwLock::new(Vec::new()),
            pool: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// The node producing into this stream.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Back `dequeue_buffer` with a recycling pool.
    pub fn set_buffer_pool(&self, pool: BufferPool, timeout: Duration) {
        *self.pool.write() = Some(PoolBinding { pool, timeout });
    }

    pub(crate) fn add_consumer(&self, node: &Arc<TaskNode>, input_index: usize) -> bool {
        let mut consumers = self.consumers.write();
        let exists = consumers
            .iter()
            .any(|c| c.node_id == node.id() && c.input_index == input_index);
        if exists {
            return false;
        }
        consumers.push(Consumer {
            node: Arc::downgrade(node),
            node_id: node.id(),
            input_index,
        });
        true
    }

    pub(crate) fn remove_consumer(&self, node_id: NodeId) -> bool {
        let mut consumers = self.consumers.write();
        let before = consumers.len();
        consumers.retain(|c| c.node_id != node_id);
        consumers.len() != before
    }

    pub fn num_consumers(&self) -> usize {
        self.consumers.read().len()
    }

    /// Buffers from this stream still waiting in consumers' input queues.
    pub fn pending(&self) -> usize {
        self.live_consumers()
            .iter()
            .filter_map(|(node, index)| node.input_handler().map(|h| h.pending(*index)))
            .sum()
    }

    fn live_consumers(&self) -> Vec<(Arc<TaskNode>, usize)> {
        self.consumers
            .read()
            .iter()
            .filter_map(|c| c.node.upgrade().map(|n| (n, c.input_index)))
            .collect()
    }

    /// Hand a produced buffer to every consumer. Ownership is shared, not copied.
    pub fn queue_buffer(&self, buffer: MediaBuffer) -> TaskResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TaskError::StreamClosed(self.info.name.clone()));
        }
        for (node, input_index) in self.live_consumers() {
            if let Err(e) = node.deliver_input(input_index, buffer.clone()) {
                tracing::debug!(
                    "{} stream '{}' could not deliver to {}: {}",
                    self.owner,
                    self.info.name,
                    node.id(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Obtain a writable buffer, from the pool when one is bound.
    pub fn dequeue_buffer(&self, block: bool, size: usize) -> TaskResult<MediaBuffer> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TaskError::StreamClosed(self.info.name.clone()));
        }
        let guard = self.pool.read();
        match guard.as_ref() {
            Some(binding) => binding.pool.acquire(size, block, binding.timeout),
            None => Ok(MediaBuffer::new(vec![0; size])),
        }
    }

    /// Close the stream and mark the matching input of every consumer closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for (node, input_index) in self.live_consumers() {
            node.on_input_stream_closed(input_index);
        }
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("owner", &self.owner)
            .field("name", &self.info.name)
            .field("consumers", &self.num_consumers())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Emitting side of a node.
#[derive(Debug)]
pub struct OutputStreamHandler {
    streams: Vec<Arc<OutputStream>>,
}

impl OutputStreamHandler {
    pub fn new(owner: NodeId, infos: Vec<StreamInfo>) -> Self {
        Self {
            streams: infos
                .into_iter()
                .map(|info| Arc::new(OutputStream::new(owner, info)))
                .collect(),
        }
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, index: usize) -> Option<&Arc<OutputStream>> {
        self.streams.get(index)
    }

    pub fn stream_by_name(&self, name: &str) -> Option<&Arc<OutputStream>> {
        self.streams.iter().find(|s| s.info().name == name)
    }

    pub fn streams(&self) -> &[Arc<OutputStream>] {
        &self.streams
    }

    pub fn close_all(&self) {
        for stream in &self.streams {
            stream.close();
        }
    }

    pub fn reopen_all(&self) {
        for stream in &self.streams {
            stream.reopen();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn handler(streams: usize) -> InputStreamHandler {
        let infos = (0..streams)
            .map(|i| StreamInfo::new(i, format!("in{}", i), StreamKind::Video))
            .collect();
        InputStreamHandler::new(NodeId(1), infos)
    }

    #[test]
    fn test_push_and_take_fifo() {
        let h = handler(1);
        for pts in 0..3 {
            h.push(0, MediaBuffer::with_pts(vec![], pts)).unwrap();
        }
        let taken = h.take_up_to(0, 2);
        assert_eq!(taken.iter().map(|b| b.pts()).collect::<Vec<_>>(), vec![Some(0), Some(1)]);
        assert_eq!(h.pending(0), 1);
        assert!(h.has_pending());
    }

    #[test]
    fn test_depth_transitions() {
        let (tx, rx) = unbounded();
        let h = handler(1);
        h.set_max_queue_size(2);
        h.set_observer(Some(tx));

        h.push(0, MediaBuffer::new(vec![])).unwrap();
        assert!(rx.try_recv().is_err());
        h.push(0, MediaBuffer::new(vec![])).unwrap();
        assert_eq!(rx.try_recv().unwrap().transition, QueueTransition::Full);

        h.take_up_to(0, 1);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.transition, QueueTransition::NotFull);
        assert_eq!(ev.depth, 1);

        h.take_up_to(0, 1);
        assert_eq!(rx.try_recv().unwrap().transition, QueueTransition::Empty);
        assert_eq!(rx.try_recv().unwrap_err(), crossbeam_channel::TryRecvError::Empty);
    }

    #[test]
    fn test_closed_stream_rejects_push() {
        let h = handler(2);
        h.close_stream(1);
        assert!(h.push(0, MediaBuffer::new(vec![])).is_ok());
        assert!(matches!(
            h.push(1, MediaBuffer::new(vec![])),
            Err(TaskError::StreamClosed(_))
        ));
        assert!(matches!(
            h.push(5, MediaBuffer::new(vec![])),
            Err(TaskError::UnknownStream(_))
        ));

        assert!(!h.all_closed_and_drained());
        h.close_all();
        assert!(!h.all_closed_and_drained());
        h.take_up_to(0, 8);
        assert!(h.all_closed_and_drained());

        h.reset();
        assert!(!h.is_closed(1));
    }

    #[test]
    fn test_output_stream_without_pool_allocates() {
        let out = OutputStream::new(NodeId(0), StreamInfo::new(0, "video", StreamKind::Video));
        let buf = out.dequeue_buffer(true, 32).unwrap();
        assert_eq!(buf.len(), 32);
        assert!(!buf.is_pooled());

        // No consumers: queueing is a no-op success.
        out.queue_buffer(buf).unwrap();
        out.close();
        assert!(matches!(
            out.queue_buffer(MediaBuffer::new(vec![])),
            Err(TaskError::StreamClosed(_))
        ));
    }

    #[test]
    fn test_output_stream_pool_binding() {
        let out = OutputStream::new(NodeId(0), StreamInfo::new(0, "audio", StreamKind::Audio));
        out.set_buffer_pool(BufferPool::new(1, 8), Duration::from_millis(5));
        let held = out.dequeue_buffer(true, 0).unwrap();
        assert!(held.is_pooled());
        assert!(out.dequeue_buffer(true, 0).is_err());
        drop(held);
        assert!(out.dequeue_buffer(false, 0).is_ok());
    }
}
