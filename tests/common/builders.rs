//! Test graph builders

use crossbeam_channel::Sender;
use mediagraph_rs::task::{
    AnyStage, BuiltinStage, CollectorSink, GainFilter, MediaBuffer, NodeId, PatternSource,
    StreamInfo, StreamKind, TaskNode,
};
use std::sync::Arc;

pub fn video(index: usize) -> StreamInfo {
    StreamInfo::new(index, format!("video{}", index), StreamKind::Video)
}

/// Source → gain → sink, already connected
pub struct LinearGraph {
    pub source: Arc<TaskNode>,
    pub filter: Arc<TaskNode>,
    pub sink: Arc<TaskNode>,
}

impl LinearGraph {
    pub fn nodes(&self) -> [&Arc<TaskNode>; 3] {
        [&self.source, &self.filter, &self.sink]
    }

    pub fn collector(&self) -> &CollectorSink {
        collector(&self.sink)
    }
}

/// Builder for the pattern → gain → collector test graph
pub struct LinearGraphBuilder {
    frames: u64,
    frame_size: usize,
    gain: f64,
    filter_concurrency: usize,
    batch: usize,
    sink_tx: Option<Sender<MediaBuffer>>,
}

impl LinearGraphBuilder {
    pub fn new() -> Self {
        Self {
            frames: 20,
            frame_size: 16,
            gain: 1.0,
            filter_concurrency: 1,
            batch: 4,
            sink_tx: None,
        }
    }

    pub fn frames(mut self, frames: u64) -> Self {
        self.frames = frames;
        self
    }

    pub fn frame_size(mut self, size: usize) -> Self {
        self.frame_size = size;
        self
    }

    pub fn gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn filter_concurrency(mut self, k: usize) -> Self {
        self.filter_concurrency = k;
        self
    }

    pub fn batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    /// Forward every buffer reaching the sink
    pub fn sink_sender(mut self, tx: Sender<MediaBuffer>) -> Self {
        self.sink_tx = Some(tx);
        self
    }

    pub fn build(self) -> LinearGraph {
        let collector = match self.sink_tx {
            Some(tx) => CollectorSink::with_sender(tx),
            None => CollectorSink::new(),
        };
        let source = TaskNode::builder(
            NodeId(0),
            "source",
            PatternSource::new(self.frames, self.frame_size),
        )
        .outputs(vec![video(0)])
        .build();
        let filter = TaskNode::builder(NodeId(1), "gain", GainFilter::new(self.gain))
            .inputs(vec![video(0)])
            .outputs(vec![video(0)])
            .max_in_scheduling(self.filter_concurrency)
            .max_batch_size(self.batch)
            .build();
        let sink = TaskNode::builder(NodeId(2), "sink", collector)
            .inputs(vec![video(0)])
            .max_batch_size(self.batch)
            .build();

        filter
            .add_stream_source(None, source.output_stream(0).unwrap())
            .unwrap();
        sink.add_stream_source(None, filter.output_stream(0).unwrap())
            .unwrap();

        LinearGraph {
            source,
            filter,
            sink,
        }
    }
}

impl Default for LinearGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn collector(node: &TaskNode) -> &CollectorSink {
    match node.stage() {
        AnyStage::Builtin(BuiltinStage::CollectorSink(c)) => c,
        _ => panic!("{} is not a collector sink", node.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_graph_builder() {
        let graph = LinearGraphBuilder::new().filter_concurrency(2).build();
        assert!(graph.source.is_source());
        assert!(graph.sink.is_sink());
        assert_eq!(graph.filter.get_stream_source(), vec![NodeId(0)]);
        assert_eq!(graph.filter.max_in_scheduling(), 2);
    }
}
