//! Processing contract for node stages.
//!
//! Two-layer design:
//! - **`TaskStage` trait**: for user-defined stages plugged into a node.
//! - **`BuiltinStage` enum**: the stages shipped with the crate. Match arms
//!   are inlined, so the hot `process` call avoids dynamic dispatch.
//!
//! `AnyStage` wraps either variant so a `TaskNode` handles both uniformly.
//!
//! All methods take `&self`: a node with a concurrency limit above one calls
//! `process` from several worker threads at once, each with its own context.

use crate::task::context::InvocationContext;
use crate::task::error::{TaskError, TaskResult};
use crate::task::options::NodeOptions;
use crate::task::stages::{CollectorSink, GainFilter, PatternSource};

/// The open / process / close contract every stage fulfils.
pub trait TaskStage: Send + Sync {
    /// Human-readable name of this stage.
    fn name(&self) -> &str;

    /// Called once per run, with the default context, before any `process`.
    fn open(&self, _ctx: &InvocationContext) -> TaskResult<()> {
        Ok(())
    }

    /// Consume staged input and/or produce output. Called zero or more times.
    fn process(&self, ctx: &InvocationContext) -> TaskResult<()>;

    /// Called once per run for every context the node allocated.
    fn close(&self, _ctx: &InvocationContext) -> TaskResult<()> {
        Ok(())
    }

    /// Out-of-band control command. `command` may be updated with a reply.
    fn invoke(&self, _command: &mut NodeOptions) -> TaskResult<()> {
        Err(TaskError::Unsupported(format!(
            "{} does not accept control commands",
            self.name()
        )))
    }
}

/// Enum dispatch for built-in stages.
pub enum BuiltinStage {
    PatternSource(PatternSource),
    GainFilter(GainFilter),
    CollectorSink(CollectorSink),
}

impl BuiltinStage {
    pub fn name(&self) -> &str {
        match self {
            BuiltinStage::PatternSource(s) => s.name(),
            BuiltinStage::GainFilter(s) => s.name(),
            BuiltinStage::CollectorSink(s) => s.name(),
        }
    }

    pub fn open(&self, ctx: &InvocationContext) -> TaskResult<()> {
        match self {
            BuiltinStage::PatternSource(s) => s.open(ctx),
            BuiltinStage::GainFilter(s) => s.open(ctx),
            BuiltinStage::CollectorSink(s) => s.open(ctx),
        }
    }

    pub fn process(&self, ctx: &InvocationContext) -> TaskResult<()> {
        match self {
            BuiltinStage::PatternSource(s) => s.process(ctx),
            BuiltinStage::GainFilter(s) => s.process(ctx),
            BuiltinStage::CollectorSink(s) => s.process(ctx),
        }
    }

    pub fn close(&self, ctx: &InvocationContext) -> TaskResult<()> {
        match self {
            BuiltinStage::PatternSource(s) => s.close(ctx),
            BuiltinStage::GainFilter(s) => s.close(ctx),
            BuiltinStage::CollectorSink(s) => s.close(ctx),
        }
    }

    pub fn invoke(&self, command: &mut NodeOptions) -> TaskResult<()> {
        match self {
            BuiltinStage::PatternSource(s) => s.invoke(command),
            BuiltinStage::GainFilter(s) => s.invoke(command),
            BuiltinStage::CollectorSink(s) => s.invoke(command),
        }
    }
}

/// Wrapper that holds either a built-in stage (enum dispatch) or a plugin (trait object).
pub enum AnyStage {
    Builtin(BuiltinStage),
    Plugin(Box<dyn TaskStage>),
}

impl AnyStage {
    pub fn plugin(stage: impl TaskStage + 'static) -> Self {
        AnyStage::Plugin(Box::new(stage))
    }

    pub fn name(&self) -> &str {
        match self {
            AnyStage::Builtin(s) => s.name(),
            AnyStage::Plugin(s) => s.name(),
        }
    }

    pub fn open(&self, ctx: &InvocationContext) -> TaskResult<()> {
        match self {
            AnyStage::Builtin(s) => s.open(ctx),
            AnyStage::Plugin(s) => s.open(ctx),
        }
    }

    pub fn process(&self, ctx: &InvocationContext) -> TaskResult<()> {
        match self {
            AnyStage::Builtin(s) => s.process(ctx),
            AnyStage::Plugin(s) => s.process(ctx),
        }
    }

    pub fn close(&self, ctx: &InvocationContext) -> TaskResult<()> {
        match self {
            AnyStage::Builtin(s) => s.close(ctx),
            AnyStage::Plugin(s) => s.close(ctx),
        }
    }

    pub fn invoke(&self, command: &mut NodeOptions) -> TaskResult<()> {
        match self {
            AnyStage::Builtin(s) => s.invoke(command),
            AnyStage::Plugin(s) => s.invoke(command),
        }
    }
}

impl From<PatternSource> for AnyStage {
    fn from(s: PatternSource) -> Self {
        AnyStage::Builtin(BuiltinStage::PatternSource(s))
    }
}

impl From<GainFilter> for AnyStage {
    fn from(s: GainFilter) -> Self {
        AnyStage::Builtin(BuiltinStage::GainFilter(s))
    }
}

impl From<CollectorSink> for AnyStage {
    fn from(s: CollectorSink) -> Self {
        AnyStage::Builtin(BuiltinStage::CollectorSink(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl TaskStage for Nop {
        fn name(&self) -> &str {
            "Nop"
        }

        fn process(&self, _ctx: &InvocationContext) -> TaskResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_invoke_defaults_to_unsupported() {
        let stage = AnyStage::plugin(Nop);
        let mut cmd = NodeOptions::new().with("op", "flush");
        let err = stage.invoke(&mut cmd).unwrap_err();
        assert!(matches!(err, TaskError::Unsupported(_)));
        assert!(err.to_string().contains("Nop"));
    }

    #[test]
    fn test_builtin_conversion_keeps_name() {
        let stage: AnyStage = CollectorSink::new().into();
        assert_eq!(stage.name(), "CollectorSink");
    }
}
