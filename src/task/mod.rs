//! Node scheduling core.
//!
//! # Architecture
//!
//! - **`TaskNode`**: one graph position. Owns its stage, stream handlers and
//!   a `ContextPool`, and runs the Idle/Scheduling/SchedulingPending protocol.
//! - **`InvocationContext`**: staging area for one call of a stage's
//!   `process`: queued input per stream, output handles, batch limit, suspend flag.
//! - **`ContextPool`**: default context plus on-demand auxiliary contexts,
//!   handed out as exclusive `ContextLease`s.
//! - **Streams**: `InputStreamHandler` transit queues feeding a node and
//!   `OutputStream` fan-out handles feeding its consumers.
//! - **`SchedulerQueue`** / **`WorkerPool`**: where scheduling passes and
//!   invocations run.
//!
//! Data flow:
//!
//! ```text
//! OutputStream::queue_buffer ─► TaskNode::deliver_input ─► InputStreamHandler
//!        ▲                               │ check_if_became_ready
//!        │                               ▼
//!   stage.process ◄─ Invocation ◄─ scheduling_loop ◄─ SchedulerQueue
//! ```

pub mod buffer;
pub mod context;
pub mod context_pool;
pub mod error;
pub mod events;
pub mod id;
pub mod node;
pub mod options;
pub mod scheduler;
pub mod stage;
pub mod stages;
pub mod state;
pub mod stream;

pub use buffer::{BufferPool, MediaBuffer};
pub use context::InvocationContext;
pub use context_pool::{ContextLease, ContextPool};
pub use error::{TaskError, TaskResult};
pub use events::{NodeEvent, QueueEvent, QueueTransition, RunHooks};
pub use id::NodeId;
pub use node::{NodeStats, TaskNode, TaskNodeBuilder};
pub use options::{NodeOptions, OptionValue};
pub use scheduler::{Invocation, SchedulerQueue, WorkerPool};
pub use stage::{AnyStage, BuiltinStage, TaskStage};
pub use stages::{CollectorSink, GainFilter, PatternSource};
pub use state::{NodeStatus, SchedulingState};
pub use stream::{InputStreamHandler, OutputStream, OutputStreamHandler, StreamInfo, StreamKind};
