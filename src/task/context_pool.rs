//! Bounded arena of invocation contexts for one node.
//!
//! Slot 0 holds the default context, created with the pool and reused for
//! every invocation of a strictly sequential node. Further slots are filled
//! on demand, up to the node's concurrency limit, and emptied again once a
//! released auxiliary context holds no pending input.
//!
//! A context is handed out as a `ContextLease`; while the lease lives no
//! other invocation can obtain the same context. Dropping the lease returns
//! the slot.
//!
//! Once `begin_close` runs no further leases are granted. Contexts that were
//! leased at that moment are handed back by `ContextLease::finish` so their
//! holder can close them after its call returns.

use crate::task::context::InvocationContext;
use crate::task::id::NodeId;
use crate::task::options::NodeOptions;
use crate::task::stream::{InputStreamHandler, OutputStream, StreamInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Slot {
    context: Option<Arc<InvocationContext>>,
    leased: bool,
}

impl Slot {
    /// Free, allocated and not parked.
    fn available(&self) -> Option<&Arc<InvocationContext>> {
        match &self.context {
            Some(ctx) if !self.leased && !ctx.is_suspended() => Some(ctx),
            _ => None,
        }
    }
}

pub struct ContextPool {
    node_id: NodeId,
    node_name: Arc<str>,
    input_infos: Vec<StreamInfo>,
    outputs: Vec<Arc<OutputStream>>,
    options: Arc<NodeOptions>,
    max_batch_size: AtomicUsize,
    // Written only under the `slots` lock.
    closing: AtomicBool,
    slots: Mutex<Vec<Slot>>,
}

impl ContextPool {
    pub fn new(
        node_id: NodeId,
        node_name: Arc<str>,
        input_infos: Vec<StreamInfo>,
        outputs: Vec<Arc<OutputStream>>,
        options: Arc<NodeOptions>,
        capacity: usize,
        max_batch_size: usize,
    ) -> Arc<Self> {
        let pool = Self {
            node_id,
            node_name,
            input_infos,
            outputs,
            options,
            max_batch_size: AtomicUsize::new(max_batch_size.max(1)),
            closing: AtomicBool::new(false),
            slots: Mutex::new((0..capacity.max(1)).map(|_| Slot::default()).collect()),
        };
        let default = pool.create(0);
        pool.slots.lock()[0].context = Some(default);
        Arc::new(pool)
    }

    fn create(&self, slot: usize) -> Arc<InvocationContext> {
        let ctx = InvocationContext::new(
            self.node_id,
            Arc::clone(&self.node_name),
            slot,
            self.input_infos.clone(),
            &self.outputs,
            Arc::clone(&self.options),
        );
        ctx.set_max_batch_process_size(self.max_batch_size.load(Ordering::Relaxed));
        Arc::new(ctx)
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// The context reused by sequential invocations.
    pub fn default_context(&self) -> Option<Arc<InvocationContext>> {
        self.slots.lock().first().and_then(|s| s.context.clone())
    }

    /// Contexts currently allocated, leased or not.
    pub fn contexts(&self) -> Vec<Arc<InvocationContext>> {
        self.slots
            .lock()
            .iter()
            .filter_map(|s| s.context.clone())
            .collect()
    }

    pub fn allocated(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.context.is_some()).count()
    }

    pub fn leased(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.leased).count()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Stop granting leases and return the contexts nobody holds.
    ///
    /// Contexts still leased are returned later, one by one, from
    /// `ContextLease::finish`. Calling this twice returns nothing the
    /// second time.
    pub fn begin_close(&self) -> Vec<Arc<InvocationContext>> {
        let slots = self.slots.lock();
        if self.closing.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        slots
            .iter()
            .filter(|s| !s.leased)
            .filter_map(|s| s.context.clone())
            .collect()
    }

    pub fn set_max_batch_size(&self, size: usize) {
        let size = size.max(1);
        self.max_batch_size.store(size, Ordering::Relaxed);
        for ctx in self.contexts() {
            ctx.set_max_batch_process_size(size);
        }
    }

    /// Lease a context that has work to do.
    ///
    /// With no input handler (source nodes) any free context qualifies.
    /// Otherwise a free context already holding input is preferred; failing
    /// that, a free or newly created context is filled from `input`. Suspended
    /// and leased contexts are never returned.
    pub fn acquire_ready(self: &Arc<Self>, input: Option<&InputStreamHandler>) -> Option<ContextLease> {
        let mut slots = self.slots.lock();
        if self.is_closing() {
            return None;
        }

        let Some(handler) = input else {
            let index = self.claim_free(&mut slots)?;
            return Some(self.lease(&mut slots, index));
        };

        let staged = slots
            .iter()
            .position(|s| s.available().is_some_and(|ctx| ctx.total_queued() > 0));
        if let Some(index) = staged {
            if let Some(ctx) = &slots[index].context {
                ctx.fill_from(handler);
            }
            return Some(self.lease(&mut slots, index));
        }

        if !handler.has_pending() {
            return None;
        }

        let index = self.claim_free(&mut slots)?;
        let moved = slots[index]
            .context
            .as_ref()
            .map_or(0, |ctx| ctx.fill_from(handler));
        if moved == 0 {
            // Raced with another consumer of the handler; nothing to run.
            if index > 0 {
                slots[index].context = None;
            }
            return None;
        }
        Some(self.lease(&mut slots, index))
    }

    /// Index of a free context, allocating into an empty slot if needed.
    fn claim_free(&self, slots: &mut [Slot]) -> Option<usize> {
        if let Some(index) = slots.iter().position(|s| s.available().is_some()) {
            return Some(index);
        }
        let index = slots.iter().position(|s| s.context.is_none())?;
        slots[index].context = Some(self.create(index));
        Some(index)
    }

    fn lease(self: &Arc<Self>, slots: &mut [Slot], index: usize) -> ContextLease {
        let slot = &mut slots[index];
        slot.leased = true;
        ContextLease {
            pool: Arc::clone(self),
            slot: index,
            context: slot.context.clone().unwrap_or_else(|| self.create(index)),
            finished: false,
        }
    }

    /// Return a slot. Yields the context when the pool started closing while
    /// it was leased.
    fn release(&self, index: usize) -> Option<Arc<InvocationContext>> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(index)?;
        slot.leased = false;
        if self.is_closing() {
            return slot.context.clone();
        }
        let idle = slot
            .context
            .as_ref()
            .is_some_and(|ctx| ctx.total_queued() == 0 && !ctx.is_suspended());
        if index > 0 && idle {
            slot.context = None;
        }
        None
    }

    /// Drop queued input from every unleased context and free auxiliary
    /// slots. Leased contexts belong to their invocation and are left alone.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.leased {
                continue;
            }
            if let Some(ctx) = &slot.context {
                ctx.clear();
            }
            if index > 0 {
                slot.context = None;
            }
        }
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("node_id", &self.node_id)
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated())
            .field("leased", &self.leased())
            .finish()
    }
}

/// Exclusive use of one context for one invocation.
pub struct ContextLease {
    pool: Arc<ContextPool>,
    slot: usize,
    context: Arc<InvocationContext>,
    finished: bool,
}

impl ContextLease {
    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Return the slot now. `Some` means the pool began closing while this
    /// lease was out and the caller owes the context its close step.
    pub fn finish(mut self) -> Option<Arc<InvocationContext>> {
        self.finished = true;
        self.pool.release(self.slot)
    }
}

impl std::ops::Deref for ContextLease {
    type Target = InvocationContext;

    fn deref(&self) -> &InvocationContext {
        &self.context
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if !self.finished && self.pool.release(self.slot).is_some() {
            tracing::warn!(
                "{} context #{} released during close without being closed",
                self.context.node_id(),
                self.slot
            );
        }
    }
}

impl std::fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("node_id", &self.context.node_id())
            .field("slot", &self.slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::buffer::MediaBuffer;
    use crate::task::stream::StreamKind;

    fn infos() -> Vec<StreamInfo> {
        vec![StreamInfo::new(0, "video", StreamKind::Video)]
    }

    fn pool(capacity: usize) -> Arc<ContextPool> {
        ContextPool::new(
            NodeId(2),
            Arc::from("filter"),
            infos(),
            Vec::new(),
            Arc::new(NodeOptions::new()),
            capacity,
            4,
        )
    }

    fn handler_with(n: i64) -> InputStreamHandler {
        let h = InputStreamHandler::new(NodeId(2), infos());
        for p in 0..n {
            h.push(0, MediaBuffer::with_pts(vec![], p)).unwrap();
        }
        h
    }

    #[test]
    fn test_sequential_pool_has_one_context() {
        let pool = pool(1);
        let handler = handler_with(8);

        let lease = pool.acquire_ready(Some(&handler)).unwrap();
        assert_eq!(lease.slot(), 0);
        assert_eq!(lease.total_queued(), 4);
        assert!(pool.acquire_ready(Some(&handler)).is_none());
        assert_eq!(pool.leased(), 1);

        drop(lease);
        assert_eq!(pool.leased(), 0);
        let again = pool.acquire_ready(Some(&handler)).unwrap();
        assert_eq!(again.slot(), 0);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_contexts_are_disjoint_up_to_capacity() {
        let pool = pool(3);
        let handler = handler_with(12);

        let leases: Vec<_> = (0..3)
            .map(|_| pool.acquire_ready(Some(&handler)).unwrap())
            .collect();
        let mut slots: Vec<_> = leases.iter().map(|l| l.slot()).collect();
        slots.sort();
        assert_eq!(slots, vec![0, 1, 2]);
        assert!(pool.acquire_ready(Some(&handler)).is_none());
        assert_eq!(pool.allocated(), 3);
    }

    #[test]
    fn test_idle_auxiliary_context_is_destroyed_on_release() {
        let pool = pool(2);
        let handler = handler_with(5);

        let first = pool.acquire_ready(Some(&handler)).unwrap();
        let second = pool.acquire_ready(Some(&handler)).unwrap();
        assert_eq!(second.slot(), 1);
        while second.deque_input_buffer(None).unwrap().is_some() {}

        drop(second);
        assert_eq!(pool.allocated(), 1);
        drop(first);
        // Default context keeps its unconsumed input.
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.default_context().unwrap().total_queued(), 4);
    }

    #[test]
    fn test_suspended_context_is_skipped() {
        let pool = pool(1);
        let handler = handler_with(2);

        let lease = pool.acquire_ready(Some(&handler)).unwrap();
        lease.suspend();
        drop(lease);
        assert!(pool.acquire_ready(Some(&handler)).is_none());

        pool.default_context().unwrap().resume();
        assert!(pool.acquire_ready(Some(&handler)).is_some());
    }

    #[test]
    fn test_no_input_means_not_ready() {
        let pool = pool(2);
        let handler = handler_with(0);
        assert!(pool.acquire_ready(Some(&handler)).is_none());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_source_acquires_without_input() {
        let pool = pool(1);
        let lease = pool.acquire_ready(None).unwrap();
        assert_eq!(lease.slot(), 0);
        assert!(pool.acquire_ready(None).is_none());
    }

    #[test]
    fn test_clear_drops_input_and_aux_slots() {
        let pool = pool(2);
        let handler = handler_with(6);
        drop(pool.acquire_ready(Some(&handler)).unwrap());
        let held = pool.acquire_ready(Some(&handler)).unwrap();
        assert_eq!(held.slot(), 0);
        let aux = pool.acquire_ready(Some(&handler)).unwrap();
        assert_eq!(aux.slot(), 1);
        drop(held);
        drop(aux);

        pool.clear();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.default_context().unwrap().total_queued(), 0);
    }

    #[test]
    fn test_clear_leaves_leased_context_alone() {
        let pool = pool(2);
        let handler = handler_with(6);
        let held = pool.acquire_ready(Some(&handler)).unwrap();
        let aux = pool.acquire_ready(Some(&handler)).unwrap();
        assert_eq!(aux.slot(), 1);

        pool.clear();
        assert_eq!(held.total_queued(), 4);
        assert_eq!(aux.total_queued(), 2);
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn test_begin_close_defers_leased_contexts() {
        let pool = pool(2);
        let handler = handler_with(6);
        let held = pool.acquire_ready(Some(&handler)).unwrap();
        let held_slot = held.slot();

        let free = pool.begin_close();
        assert!(free.iter().all(|ctx| ctx.slot() != held_slot));
        assert!(pool.begin_close().is_empty());
        assert!(pool.acquire_ready(Some(&handler)).is_none());

        let owed = held.finish().unwrap();
        assert_eq!(owed.slot(), held_slot);
        assert_eq!(pool.leased(), 0);
    }

    #[test]
    fn test_finish_before_close_owes_nothing() {
        let pool = pool(1);
        let handler = handler_with(1);
        let lease = pool.acquire_ready(Some(&handler)).unwrap();
        assert!(lease.finish().is_none());
        assert_eq!(pool.begin_close().len(), 1);
    }
}
