//! CollectorSink: terminal stage that records what it receives.
//!
//! Drains every input stream on each invocation and keeps the presentation
//! times in arrival order. Optionally forwards each buffer over a channel;
//! when that channel is full the buffer is dropped and counted.

use crate::task::buffer::MediaBuffer;
use crate::task::context::InvocationContext;
use crate::task::error::{TaskError, TaskResult};
use crate::task::options::NodeOptions;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct CollectorSink {
    received: Mutex<Vec<Option<i64>>>,
    bytes: AtomicU64,
    dropped: AtomicU64,
    tx: Option<Sender<MediaBuffer>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            bytes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            tx: None,
        }
    }

    pub fn with_sender(tx: Sender<MediaBuffer>) -> Self {
        Self {
            tx: Some(tx),
            ..Self::new()
        }
    }

    pub fn name(&self) -> &str {
        "CollectorSink"
    }

    /// Presentation times received, in arrival order.
    pub fn received(&self) -> Vec<Option<i64>> {
        self.received.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Buffers that could not be forwarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn open(&self, _ctx: &InvocationContext) -> TaskResult<()> {
        self.received.lock().clear();
        self.bytes.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub fn process(&self, ctx: &InvocationContext) -> TaskResult<()> {
        for info in ctx.input_infos() {
            while let Some(buffer) = ctx.deque_input_buffer(Some(&info.name))? {
                self.received.lock().push(buffer.pts());
                self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
                self.forward(buffer);
            }
        }
        Ok(())
    }

    fn forward(&self, buffer: MediaBuffer) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn close(&self, _ctx: &InvocationContext) -> TaskResult<()> {
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::warn!("CollectorSink dropped {} buffers (channel full)", dropped);
        }
        Ok(())
    }

    pub fn invoke(&self, _command: &mut NodeOptions) -> TaskResult<()> {
        Err(TaskError::Unsupported(
            "CollectorSink does not accept control commands".to_string(),
        ))
    }
}

impl Default for CollectorSink {
    fn default() -> Self {
        Self::new()
    }
}
