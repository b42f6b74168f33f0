//! # mediagraph-rs: node scheduling for streaming media graphs
//!
//! Each stage of a media graph (demuxer, decoder, filter, sink) is a
//! `TaskNode`. Nodes exchange reference-counted `MediaBuffer`s over streams
//! and are woken whenever their input changes. A wake-up either starts the
//! node's scheduling pass on a worker thread or, if a pass is already
//! running, is folded into a single pending recheck.
//!
//! ## Architecture
//!
//! - **Task core** (`task`): nodes, invocation contexts, context pools,
//!   streams and the worker pool that runs scheduling passes
//! - **Stages** (`task::stages`): built-in source, filter and sink stages;
//!   custom stages implement `TaskStage`
//! - **Communication**: Crossbeam channels for invocations and notifications
//! - **Configuration** (`config`): TOML runtime settings
//!
//! ## Example
//!
//! ```ignore
//! use mediagraph_rs::task::*;
//!
//! let pool = WorkerPool::new(4)?;
//! let source = TaskNode::builder(NodeId(0), "source", PatternSource::new(100, 1024))
//!     .outputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
//!     .build();
//! let sink = TaskNode::builder(NodeId(1), "sink", CollectorSink::new())
//!     .inputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
//!     .build();
//! sink.add_stream_source(None, source.output_stream(0).unwrap())?;
//!
//! for node in [&source, &sink] {
//!     node.set_scheduler_queue(&pool);
//!     node.prepare_for_run(NodeOptions::new(), pool.hooks())?;
//! }
//! sink.open_node()?;
//! source.open_node()?;
//! source.check_if_became_ready();
//! ```

pub mod config;
pub mod error;
pub mod task;

// Re-export commonly used types
pub use config::{GraphConfig, NodeSettings, SchedulerSettings};
pub use error::{GraphError, Result};
pub use task::{
    AnyStage, InvocationContext, MediaBuffer, NodeId, NodeOptions, RunHooks, TaskError,
    TaskNode, TaskResult, TaskStage, WorkerPool,
};
