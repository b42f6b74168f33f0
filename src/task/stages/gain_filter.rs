//! GainFilter: scales every byte of each input buffer by a gain factor.
//!
//! Consumes up to the context's batch limit per invocation and emits one
//! output buffer per input buffer with the same presentation time. The gain
//! can be set through the `gain` option at open, or changed while running
//! with an `invoke` command carrying a `gain` key.

use crate::task::context::InvocationContext;
use crate::task::error::{TaskError, TaskResult};
use crate::task::options::NodeOptions;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct GainFilter {
    gain: RwLock<f64>,
    processed: AtomicU64,
}

impl GainFilter {
    pub fn new(gain: f64) -> Self {
        Self {
            gain: RwLock::new(gain),
            processed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        "GainFilter"
    }

    pub fn gain(&self) -> f64 {
        *self.gain.read()
    }

    /// Buffers processed since the last open.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn set_gain(&self, gain: f64) -> TaskResult<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(TaskError::Config(format!("invalid gain {}", gain)));
        }
        *self.gain.write() = gain;
        Ok(())
    }

    pub fn open(&self, ctx: &InvocationContext) -> TaskResult<()> {
        if let Some(gain) = ctx.options().get_float("gain") {
            self.set_gain(gain)?;
        }
        self.processed.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub fn process(&self, ctx: &InvocationContext) -> TaskResult<()> {
        let gain = self.gain();
        for _ in 0..ctx.max_batch_process_size() {
            let Some(input) = ctx.deque_input_buffer(None)? else {
                break;
            };
            let mut output = ctx.deque_output_buffer(true, input.len(), None)?;
            if let Some(data) = output.data_mut() {
                data.resize(input.len(), 0);
                for (out, sample) in data.iter_mut().zip(input.data()) {
                    *out = (f64::from(*sample) * gain).round().clamp(0.0, 255.0) as u8;
                }
            }
            if let Some(pts) = input.pts() {
                output.set_pts(pts);
            }
            ctx.queue_output_buffer(output, None)?;
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn close(&self, _ctx: &InvocationContext) -> TaskResult<()> {
        Ok(())
    }

    /// Accepts `{ gain = <float> }`; replies with `applied = true`.
    pub fn invoke(&self, command: &mut NodeOptions) -> TaskResult<()> {
        let gain = command
            .get_float("gain")
            .ok_or_else(|| TaskError::Unsupported("GainFilter only accepts a 'gain' command".to_string()))?;
        self.set_gain(gain)?;
        tracing::debug!("GainFilter gain set to {}", gain);
        command.set("applied", true);
        Ok(())
    }
}

impl Default for GainFilter {
    fn default() -> Self {
        Self::new(1.0)
    }
}
