//! PatternSource: synthetic demuxer-like source.
//!
//! Emits a fixed number of frames, one per `process` call, each filled with
//! a byte pattern derived from its sequence number. After the last frame it
//! closes its outputs and suspends its context, which ends its readiness.
//!
//! Options read at open: `frames`, `frame_size`, `frame_duration`.

use crate::task::context::InvocationContext;
use crate::task::error::{TaskError, TaskResult};
use crate::task::options::NodeOptions;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

pub struct PatternSource {
    frames: AtomicU64,
    frame_size: AtomicUsize,
    frame_duration: AtomicI64,
    produced: AtomicU64,
}

impl PatternSource {
    pub fn new(frames: u64, frame_size: usize) -> Self {
        Self {
            frames: AtomicU64::new(frames),
            frame_size: AtomicUsize::new(frame_size),
            frame_duration: AtomicI64::new(40),
            produced: AtomicU64::new(0),
        }
    }

    /// Presentation-time step between frames.
    pub fn with_frame_duration(self, duration: i64) -> Self {
        self.frame_duration.store(duration, Ordering::Relaxed);
        self
    }

    pub fn name(&self) -> &str {
        "PatternSource"
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire).min(self.frames.load(Ordering::Relaxed))
    }

    pub fn open(&self, ctx: &InvocationContext) -> TaskResult<()> {
        let options = ctx.options();
        if let Some(frames) = options.get_int("frames") {
            let frames = u64::try_from(frames)
                .map_err(|_| TaskError::Config(format!("frames must be >= 0, got {}", frames)))?;
            self.frames.store(frames, Ordering::Relaxed);
        }
        if let Some(size) = options.get_int("frame_size") {
            let size = usize::try_from(size)
                .map_err(|_| TaskError::Config(format!("frame_size must be >= 0, got {}", size)))?;
            self.frame_size.store(size, Ordering::Relaxed);
        }
        if let Some(duration) = options.get_int("frame_duration") {
            self.frame_duration.store(duration, Ordering::Relaxed);
        }
        self.produced.store(0, Ordering::Release);
        Ok(())
    }

    pub fn process(&self, ctx: &InvocationContext) -> TaskResult<()> {
        let limit = self.frames.load(Ordering::Relaxed);
        let seq = self.produced.fetch_add(1, Ordering::AcqRel);
        if seq >= limit {
            Self::finish(ctx);
            return Ok(());
        }

        let size = self.frame_size.load(Ordering::Relaxed);
        let mut frame = ctx.deque_output_buffer(true, size, None)?;
        if let Some(data) = frame.data_mut() {
            data.fill((seq % 251) as u8);
        }
        frame.set_pts(seq as i64 * self.frame_duration.load(Ordering::Relaxed));
        tracing::trace!("{} emitting frame {}", ctx.node_id(), seq);
        ctx.queue_output_buffer(frame, None)?;

        if seq + 1 == limit {
            Self::finish(ctx);
        }
        Ok(())
    }

    fn finish(ctx: &InvocationContext) {
        for stream in ctx.output_streams() {
            stream.close();
        }
        ctx.suspend();
    }

    pub fn close(&self, _ctx: &InvocationContext) -> TaskResult<()> {
        tracing::debug!("PatternSource closed after {} frames", self.produced());
        Ok(())
    }

    pub fn invoke(&self, _command: &mut NodeOptions) -> TaskResult<()> {
        Err(TaskError::Unsupported(
            "PatternSource does not accept control commands".to_string(),
        ))
    }
}
