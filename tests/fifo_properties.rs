//! Property tests for ordering and wake-up coalescing

mod common;

use common::builders::{collector, video};
use mediagraph_rs::task::state::SchedulingCell;
use mediagraph_rs::task::{
    CollectorSink, MediaBuffer, NodeId, NodeOptions, RunHooks, SchedulingState, TaskNode,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_single_stream_is_fifo(
        pts in prop::collection::vec(any::<i32>(), 0..64),
        batch in 1usize..8,
    ) {
        let node = TaskNode::builder(NodeId(1), "sink", CollectorSink::new())
            .inputs(vec![video(0)])
            .max_batch_size(batch)
            .build();
        node.prepare_for_run(NodeOptions::new(), RunHooks::new()).unwrap();
        node.open_node().unwrap();

        let input = node.input_handler().unwrap();
        for p in &pts {
            input.push(0, MediaBuffer::with_pts(vec![], i64::from(*p))).unwrap();
        }
        node.check_if_became_ready();

        let expected: Vec<_> = pts.iter().map(|p| Some(i64::from(*p))).collect();
        prop_assert_eq!(collector(&node).received(), expected);
        prop_assert_eq!(node.current_in_scheduling(), 0);
        prop_assert_eq!(node.scheduling_state(), SchedulingState::Idle);
    }

    #[test]
    fn prop_interleaved_streams_keep_per_stream_order(
        streams in prop::collection::vec(0usize..2, 1..80),
    ) {
        let node = TaskNode::builder(NodeId(2), "mux", CollectorSink::new())
            .inputs(vec![video(0), video(1)])
            .max_batch_size(3)
            .build();
        node.prepare_for_run(NodeOptions::new(), RunHooks::new()).unwrap();
        node.open_node().unwrap();

        let mut seq = [0i64; 2];
        for stream in &streams {
            let pts = *stream as i64 * 10_000 + seq[*stream];
            seq[*stream] += 1;
            node.deliver_input(*stream, MediaBuffer::with_pts(vec![], pts)).unwrap();
        }

        let received: Vec<i64> = collector(&node).received().into_iter().flatten().collect();
        prop_assert_eq!(received.len(), streams.len());
        for stream in 0..2i64 {
            let ordered: Vec<_> = received
                .iter()
                .filter(|p| **p / 10_000 == stream)
                .copied()
                .collect();
            let expected: Vec<_> = (0..seq[stream as usize]).map(|s| stream * 10_000 + s).collect();
            prop_assert_eq!(ordered, expected);
        }
    }

    #[test]
    fn prop_wakeups_during_pass_coalesce_to_one_recheck(wakeups in 0usize..500) {
        let cell = SchedulingCell::new();
        prop_assert!(cell.try_begin());
        for _ in 0..wakeups {
            prop_assert!(!cell.try_begin());
        }
        if wakeups > 0 {
            prop_assert!(cell.end());
        }
        prop_assert!(!cell.end());
        prop_assert_eq!(cell.get(), SchedulingState::Idle);
    }
}
