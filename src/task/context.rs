//! Per-invocation staging area.
//!
//! An `InvocationContext` carries the input buffers one execution of a
//! node's processing step will consume, the output handles it may produce
//! into, and a couple of knobs (batch limit, suspend flag). A context is
//! leased to at most one invocation at a time by the `ContextPool`.
//!
//! Stream arguments are `Option<&str>`: `None` addresses the single
//! configured stream and fails with `AmbiguousStream` when there are
//! several.

use crate::task::buffer::MediaBuffer;
use crate::task::error::{TaskError, TaskResult};
use crate::task::id::NodeId;
use crate::task::options::NodeOptions;
use crate::task::stream::{InputStreamHandler, OutputStream, StreamInfo};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of buffers one invocation is expected to consume.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 4;

fn pick<'m, V>(map: &'m BTreeMap<String, V>, stream: Option<&str>) -> TaskResult<&'m V> {
    match stream {
        Some(name) => map
            .get(name)
            .ok_or_else(|| TaskError::UnknownStream(name.to_string())),
        None if map.len() > 1 => Err(TaskError::AmbiguousStream { count: map.len() }),
        None => map
            .values()
            .next()
            .ok_or_else(|| TaskError::UnknownStream("no stream configured".to_string())),
    }
}

fn pick_mut<'m, V>(map: &'m mut BTreeMap<String, V>, stream: Option<&str>) -> TaskResult<&'m mut V> {
    let count = map.len();
    match stream {
        Some(name) => map
            .get_mut(name)
            .ok_or_else(|| TaskError::UnknownStream(name.to_string())),
        None if count > 1 => Err(TaskError::AmbiguousStream { count }),
        None => map
            .values_mut()
            .next()
            .ok_or_else(|| TaskError::UnknownStream("no stream configured".to_string())),
    }
}

pub struct InvocationContext {
    node_id: NodeId,
    node_name: Arc<str>,
    slot: usize,
    input_infos: Vec<StreamInfo>,
    inputs: Mutex<BTreeMap<String, VecDeque<MediaBuffer>>>,
    outputs: BTreeMap<String, Arc<OutputStream>>,
    options: Arc<NodeOptions>,
    suspended: AtomicBool,
    max_batch_size: AtomicUsize,
}

impl InvocationContext {
    pub fn new(
        node_id: NodeId,
        node_name: Arc<str>,
        slot: usize,
        input_infos: Vec<StreamInfo>,
        outputs: &[Arc<OutputStream>],
        options: Arc<NodeOptions>,
    ) -> Self {
        let inputs = input_infos
            .iter()
            .map(|info| (info.name.clone(), VecDeque::new()))
            .collect();
        let outputs = outputs
            .iter()
            .map(|s| (s.info().name.clone(), Arc::clone(s)))
            .collect();
        Self {
            node_id,
            node_name,
            slot,
            input_infos,
            inputs: Mutex::new(inputs),
            outputs,
            options,
            suspended: AtomicBool::new(false),
            max_batch_size: AtomicUsize::new(DEFAULT_MAX_BATCH_SIZE),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Position of this context in its pool. Slot 0 is the default context.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    // ── Suspension ──

    /// Park this context: it keeps its queued input but is skipped by
    /// readiness checks until resumed.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    // ── Batch limit ──

    pub fn set_max_batch_process_size(&self, size: usize) {
        self.max_batch_size.store(size.max(1), Ordering::Relaxed);
    }

    pub fn max_batch_process_size(&self) -> usize {
        self.max_batch_size.load(Ordering::Relaxed)
    }

    // ── Inputs ──

    /// Input stream descriptors, in declaration order.
    pub fn input_infos(&self) -> &[StreamInfo] {
        &self.input_infos
    }

    pub fn has_input(&self, stream: &str) -> bool {
        self.inputs.lock().contains_key(stream)
    }

    pub fn input_info(&self, stream: Option<&str>) -> TaskResult<&StreamInfo> {
        match stream {
            Some(name) => self
                .input_infos
                .iter()
                .find(|i| i.name == name)
                .ok_or_else(|| TaskError::UnknownStream(name.to_string())),
            None if self.input_infos.len() > 1 => Err(TaskError::AmbiguousStream {
                count: self.input_infos.len(),
            }),
            None => self
                .input_infos
                .first()
                .ok_or_else(|| TaskError::UnknownStream("no stream configured".to_string())),
        }
    }

    pub fn queue_input_buffer(&self, buffer: MediaBuffer, stream: Option<&str>) -> TaskResult<()> {
        let mut inputs = self.inputs.lock();
        pick_mut(&mut inputs, stream)?.push_back(buffer);
        Ok(())
    }

    /// Remove and return the head buffer, or `None` when the stream is empty.
    pub fn deque_input_buffer(&self, stream: Option<&str>) -> TaskResult<Option<MediaBuffer>> {
        let mut inputs = self.inputs.lock();
        Ok(pick_mut(&mut inputs, stream)?.pop_front())
    }

    /// Peek at the head buffer without removing it.
    pub fn input_head_buffer(&self, stream: Option<&str>) -> TaskResult<Option<MediaBuffer>> {
        let inputs = self.inputs.lock();
        Ok(pick(&inputs, stream)?.front().cloned())
    }

    pub fn inputs_size(&self, stream: Option<&str>) -> TaskResult<usize> {
        let inputs = self.inputs.lock();
        Ok(pick(&inputs, stream)?.len())
    }

    pub fn input_is_empty(&self, stream: Option<&str>) -> TaskResult<bool> {
        self.inputs_size(stream).map(|n| n == 0)
    }

    /// Buffers queued across all input streams.
    pub fn total_queued(&self) -> usize {
        self.inputs.lock().values().map(VecDeque::len).sum()
    }

    /// Top up each input stream from `handler` until it holds the batch limit.
    ///
    /// Streams are visited in declaration order. Returns the number of
    /// buffers moved.
    pub(crate) fn fill_from(&self, handler: &InputStreamHandler) -> usize {
        let limit = self.max_batch_process_size();
        let mut inputs = self.inputs.lock();
        let mut moved = 0;
        for info in &self.input_infos {
            let Some(queue) = inputs.get_mut(&info.name) else {
                continue;
            };
            let room = limit.saturating_sub(queue.len());
            let taken = handler.take_up_to(info.index, room);
            moved += taken.len();
            queue.extend(taken);
        }
        moved
    }

    /// Drop all queued input and clear the suspend flag.
    pub fn clear(&self) {
        for queue in self.inputs.lock().values_mut() {
            queue.clear();
        }
        self.resume();
    }

    // ── Outputs ──

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Every output stream, ordered by name.
    pub fn output_streams(&self) -> impl Iterator<Item = &Arc<OutputStream>> {
        self.outputs.values()
    }

    pub fn outputs(&self, stream: Option<&str>) -> TaskResult<&Arc<OutputStream>> {
        pick(&self.outputs, stream)
    }

    pub fn output_info(&self, stream: Option<&str>) -> TaskResult<&StreamInfo> {
        self.outputs(stream).map(|s| s.info())
    }

    /// Whether every consumer has taken what this output handed it.
    pub fn output_is_empty(&self, stream: Option<&str>) -> TaskResult<bool> {
        self.outputs(stream).map(|s| s.pending() == 0)
    }

    /// Fan a produced buffer out to every consumer of the output stream.
    pub fn queue_output_buffer(&self, buffer: MediaBuffer, stream: Option<&str>) -> TaskResult<()> {
        self.outputs(stream)?.queue_buffer(buffer)
    }

    /// Obtain a writable buffer of `size` bytes from the output stream.
    ///
    /// With `block`, may wait on the stream's buffer pool.
    pub fn deque_output_buffer(
        &self,
        block: bool,
        size: usize,
        stream: Option<&str>,
    ) -> TaskResult<MediaBuffer> {
        self.outputs(stream)?.dequeue_buffer(block, size)
    }

    /// Log queue depths at debug level.
    pub fn dump(&self) {
        let inputs = self.inputs.lock();
        tracing::debug!(
            "{} '{}' context #{} (suspended: {}, batch: {})",
            self.node_id,
            self.node_name,
            self.slot,
            self.is_suspended(),
            self.max_batch_process_size()
        );
        for (name, queue) in inputs.iter() {
            tracing::debug!("  input '{}': {} queued", name, queue.len());
        }
        for (name, stream) in &self.outputs {
            tracing::debug!("  output '{}': {} consumers", name, stream.num_consumers());
        }
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("node_id", &self.node_id)
            .field("slot", &self.slot)
            .field("queued", &self.total_queued())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::stream::StreamKind;

    fn context(inputs: &[&str], outputs: &[&str]) -> InvocationContext {
        let infos = inputs
            .iter()
            .enumerate()
            .map(|(i, n)| StreamInfo::new(i, *n, StreamKind::Video))
            .collect();
        let outs: Vec<_> = outputs
            .iter()
            .enumerate()
            .map(|(i, n)| Arc::new(OutputStream::new(NodeId(1), StreamInfo::new(i, *n, StreamKind::Video))))
            .collect();
        InvocationContext::new(
            NodeId(1),
            Arc::from("decoder"),
            0,
            infos,
            &outs,
            Arc::new(NodeOptions::new()),
        )
    }

    fn pts(buf: Option<MediaBuffer>) -> Option<i64> {
        buf.and_then(|b| b.pts())
    }

    #[test]
    fn test_fifo_on_single_stream() {
        let ctx = context(&["video"], &[]);
        for p in 0..3 {
            ctx.queue_input_buffer(MediaBuffer::with_pts(vec![], p), None).unwrap();
        }
        assert_eq!(ctx.inputs_size(None).unwrap(), 3);
        assert_eq!(pts(ctx.input_head_buffer(None).unwrap()), Some(0));
        assert_eq!(pts(ctx.deque_input_buffer(None).unwrap()), Some(0));
        assert_eq!(pts(ctx.deque_input_buffer(Some("video")).unwrap()), Some(1));
        assert_eq!(pts(ctx.deque_input_buffer(None).unwrap()), Some(2));
        assert!(ctx.deque_input_buffer(None).unwrap().is_none());
        assert!(ctx.input_is_empty(None).unwrap());
    }

    #[test]
    fn test_unnamed_stream_is_ambiguous_with_several_inputs() {
        let ctx = context(&["audio", "video"], &[]);
        assert_eq!(
            ctx.inputs_size(None),
            Err(TaskError::AmbiguousStream { count: 2 })
        );
        assert!(matches!(
            ctx.deque_input_buffer(Some("subs")),
            Err(TaskError::UnknownStream(_))
        ));
        ctx.queue_input_buffer(MediaBuffer::new(vec![1]), Some("audio")).unwrap();
        assert_eq!(ctx.inputs_size(Some("audio")).unwrap(), 1);
        assert_eq!(ctx.inputs_size(Some("video")).unwrap(), 0);
        assert!(ctx.has_input("video"));
        assert!(!ctx.has_input("subs"));
    }

    #[test]
    fn test_suspend_keeps_queued_input() {
        let ctx = context(&["video"], &[]);
        ctx.set_max_batch_process_size(2);
        for p in 0..3 {
            ctx.queue_input_buffer(MediaBuffer::with_pts(vec![], p), None).unwrap();
        }

        let batch = ctx.max_batch_process_size();
        let mut consumed = Vec::new();
        while consumed.len() < batch {
            match ctx.deque_input_buffer(None).unwrap() {
                Some(buf) => consumed.push(buf.pts()),
                None => break,
            }
        }
        ctx.suspend();

        assert_eq!(consumed, vec![Some(0), Some(1)]);
        assert!(ctx.is_suspended());
        assert_eq!(ctx.inputs_size(None).unwrap(), 1);

        ctx.resume();
        assert_eq!(pts(ctx.deque_input_buffer(None).unwrap()), Some(2));
    }

    #[test]
    fn test_fill_respects_batch_limit() {
        let ctx = context(&["video"], &[]);
        ctx.set_max_batch_process_size(2);
        let handler = InputStreamHandler::new(
            NodeId(1),
            vec![StreamInfo::new(0, "video", StreamKind::Video)],
        );
        for p in 0..3 {
            handler.push(0, MediaBuffer::with_pts(vec![], p)).unwrap();
        }

        assert_eq!(ctx.fill_from(&handler), 2);
        assert_eq!(ctx.fill_from(&handler), 0);
        ctx.deque_input_buffer(None).unwrap();
        assert_eq!(ctx.fill_from(&handler), 1);
        assert_eq!(pts(ctx.deque_input_buffer(None).unwrap()), Some(1));
        assert_eq!(pts(ctx.deque_input_buffer(None).unwrap()), Some(2));
    }

    #[test]
    fn test_output_lookup() {
        let ctx = context(&[], &["video"]);
        assert_eq!(ctx.num_outputs(), 1);
        assert_eq!(ctx.output_info(None).unwrap().name, "video");
        let buf = ctx.deque_output_buffer(false, 4, None).unwrap();
        assert_eq!(buf.len(), 4);
        ctx.queue_output_buffer(buf, None).unwrap();

        let none = context(&[], &[]);
        assert!(none.outputs(None).is_err());
    }

    #[test]
    fn test_clear_resets_state() {
        let ctx = context(&["video"], &[]);
        ctx.queue_input_buffer(MediaBuffer::new(vec![]), None).unwrap();
        ctx.suspend();
        ctx.clear();
        assert_eq!(ctx.total_queued(), 0);
        assert!(!ctx.is_suspended());
    }
}
