//! mediagraph demo runner
//!
//! Usage:
//!   mediagraph [config.toml] [--frames N] [--gain G]
//!
//! Builds pattern source → gain filter → collector sink, runs it on a worker
//! pool until the source is exhausted, then prints a JSON run report.
//! Set `MEDIAGRAPH_LOG_DIR` to also write a daily-rotated log file.

use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use mediagraph_rs::config::{default_config_path, GraphConfig};
use mediagraph_rs::task::{
    AnyStage, BufferPool, BuiltinStage, CollectorSink, GainFilter, NodeEvent, NodeId,
    NodeStats, PatternSource, StreamInfo, StreamKind, TaskNode, WorkerPool,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FRAME_SIZE: usize = 4096;
const RUN_TIMEOUT: Duration = Duration::from_secs(30);

struct Args {
    config: Option<PathBuf>,
    frames: u64,
    gain: f64,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        frames: 100,
        gain: 0.5,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--frames" => {
                let value = iter.next().context("--frames requires a value")?;
                args.frames = value.parse().context("--frames must be an integer")?;
            }
            "--gain" => {
                let value = iter.next().context("--gain requires a value")?;
                args.gain = value.parse().context("--gain must be a number")?;
            }
            flag if flag.starts_with('-') => bail!("unknown option {}", flag),
            path => args.config = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

#[derive(Serialize)]
struct NodeReport {
    id: u32,
    name: String,
    stage: String,
    stats: NodeStats,
}

#[derive(Serialize)]
struct RunReport {
    frames_received: usize,
    bytes_received: u64,
    elapsed_ms: u128,
    failures: usize,
    nodes: Vec<NodeReport>,
}

fn main() -> Result<()> {
    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => GraphConfig::load(path)?,
        None => default_config_path()
            .filter(|p| p.exists())
            .map(GraphConfig::load_or_default)
            .unwrap_or_default(),
    };
    tracing::info!("Starting mediagraph with {:?}", config);

    let report = run(&config, &args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mediagraph_rs=debug"));

    match std::env::var_os("MEDIAGRAPH_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mediagraph.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}

fn run(config: &GraphConfig, args: &Args) -> Result<RunReport> {
    let pool = WorkerPool::new(config.scheduler.worker_threads)
        .context("Failed to start worker pool")?;
    let (events_tx, events_rx) = unbounded::<NodeEvent>();

    let source = TaskNode::builder(NodeId(0), "source", PatternSource::new(args.frames, FRAME_SIZE))
        .outputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
        .build();
    let filter = TaskNode::builder(NodeId(1), "gain", GainFilter::new(args.gain))
        .inputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
        .outputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
        .build();
    let sink = TaskNode::builder(NodeId(2), "sink", CollectorSink::new())
        .inputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
        .build();
    let nodes = [Arc::clone(&source), Arc::clone(&filter), Arc::clone(&sink)];

    let timeout = config.scheduler.buffer_acquire_timeout();
    for node in &nodes {
        if let Some(output) = node.output_stream(0) {
            output.set_buffer_pool(
                BufferPool::new(config.node.max_input_queue_size * 2, FRAME_SIZE),
                timeout,
            );
        }
    }
    connect(&source, &filter)?;
    connect(&filter, &sink)?;

    for node in &nodes {
        node.set_max_input_stream_queue_size(config.node.max_input_queue_size);
        node.set_scheduler_queue(&pool);
        node.prepare_for_run(
            config.node.to_options(),
            pool.hooks().with_events(events_tx.clone()),
        )
        .with_context(|| format!("Failed to prepare {}", node.name()))?;
    }

    // Downstream first so no buffer reaches a node that is not open yet
    let started = Instant::now();
    for node in nodes.iter().rev() {
        node.open_node()
            .with_context(|| format!("Failed to open {}", node.name()))?;
    }

    let failures = drive(&nodes, &events_rx)?;
    let elapsed = started.elapsed();

    for node in &nodes {
        if let Err(e) = node.close_node() {
            tracing::warn!("{} close reported: {}", node.name(), e);
        }
    }

    let (frames_received, bytes_received) = match sink.stage() {
        AnyStage::Builtin(BuiltinStage::CollectorSink(collector)) => {
            (collector.count(), collector.bytes())
        }
        _ => (0, 0),
    };
    let report = RunReport {
        frames_received,
        bytes_received,
        elapsed_ms: elapsed.as_millis(),
        failures,
        nodes: nodes
            .iter()
            .map(|n| NodeReport {
                id: n.id().0,
                name: n.name().to_string(),
                stage: n.stage().name().to_string(),
                stats: n.stats(),
            })
            .collect(),
    };

    for node in &nodes {
        node.cleanup_after_run()?;
    }
    pool.shutdown();
    Ok(report)
}

fn connect(upstream: &Arc<TaskNode>, downstream: &Arc<TaskNode>) -> Result<()> {
    let output = upstream
        .output_stream(0)
        .with_context(|| format!("{} has no output stream", upstream.name()))?;
    downstream.add_stream_source(None, output)?;
    Ok(())
}

/// Pump events and close each node once it has drained, in graph order.
fn drive(nodes: &[Arc<TaskNode>], events: &Receiver<NodeEvent>) -> Result<usize> {
    let deadline = Instant::now() + RUN_TIMEOUT;
    let mut failures = 0;

    while !nodes.iter().all(|n| n.closed()) {
        if Instant::now() > deadline {
            for node in nodes {
                node.dump();
            }
            bail!("graph did not finish within {:?}", RUN_TIMEOUT);
        }

        match events.recv_timeout(Duration::from_millis(20)) {
            Ok(NodeEvent::SourceOpened(id)) => {
                if let Some(node) = nodes.iter().find(|n| n.id() == id) {
                    node.check_if_became_ready();
                }
            }
            Ok(NodeEvent::ProcessFailed { node_id, error }) => {
                failures += 1;
                tracing::warn!("{} failed: {}", node_id, error);
            }
            Ok(NodeEvent::Closed(id)) => tracing::debug!("{} reported closed", id),
            Err(_) => {}
        }

        for node in nodes {
            if !node.closed() && node.is_done() {
                node.close_node()?;
            }
        }
    }
    Ok(failures)
}
