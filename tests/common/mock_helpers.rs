//! Channel and scheduler helpers

use crossbeam_channel::{unbounded, Receiver};
use mediagraph_rs::task::{NodeEvent, NodeOptions, RunHooks, TaskNode, WorkerPool};
use std::sync::Arc;

/// Prepare every node on `pool` and return the shared event receiver
pub fn prepare_on_pool(pool: &Arc<WorkerPool>, nodes: &[&Arc<TaskNode>]) -> Receiver<NodeEvent> {
    let (tx, rx) = unbounded();
    for node in nodes {
        node.set_scheduler_queue(pool);
        node.prepare_for_run(NodeOptions::new(), pool.hooks().with_events(tx.clone()))
            .unwrap();
    }
    rx
}

/// Prepare every node to run inline on the waking thread
pub fn prepare_inline(nodes: &[&Arc<TaskNode>]) -> Receiver<NodeEvent> {
    let (tx, rx) = unbounded();
    for node in nodes {
        node.prepare_for_run(NodeOptions::new(), RunHooks::new().with_events(tx.clone()))
            .unwrap();
    }
    rx
}

/// Open sinks first, then start every source
pub fn open_and_start(nodes: &[&Arc<TaskNode>]) {
    for node in nodes.iter().rev() {
        node.open_node().unwrap();
    }
    for node in nodes.iter().filter(|n| n.is_source()) {
        node.check_if_became_ready();
    }
}

/// Close every node that has drained, in order, until all are closed
pub fn close_when_done(nodes: &[&Arc<TaskNode>]) -> bool {
    super::wait_until(|| {
        for node in nodes {
            if !node.closed() && node.is_done() {
                node.close_node().unwrap();
            }
        }
        nodes.iter().all(|n| n.closed())
    })
}
