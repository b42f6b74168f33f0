//! Scheduling state and lifecycle status of a node.
//!
//! The two axes are independent: a node can be `Opened` and `Idle`, or
//! `Active` and `SchedulingPending`.
//!
//! Scheduling transitions:
//!
//! ```text
//! Idle ──try_begin──► Scheduling ──(other thread wakes)──► SchedulingPending
//!  ▲                     │  ▲                                    │
//!  └──── end (no pending)┘  └──────── end (acknowledge) ─────────┘
//! ```
//!
//! Only the thread that won `try_begin` may call `end`.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulingState {
    Idle = 0,
    Scheduling = 1,
    SchedulingPending = 2,
}

impl SchedulingState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SchedulingState::Scheduling,
            2 => SchedulingState::SchedulingPending,
            _ => SchedulingState::Idle,
        }
    }
}

/// Lock-free three-valued dirty flag.
#[derive(Debug)]
pub struct SchedulingCell(AtomicU8);

impl SchedulingCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(SchedulingState::Idle as u8))
    }

    pub fn get(&self) -> SchedulingState {
        SchedulingState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn cas(&self, from: SchedulingState, to: SchedulingState) -> Result<(), SchedulingState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SchedulingState::from_u8)
    }

    /// Become the scheduling thread, or leave a pending mark for it.
    ///
    /// Returns `true` for exactly one caller per pass. Every other caller
    /// returns `false` with the state left at `SchedulingPending`.
    pub fn try_begin(&self) -> bool {
        let mut current = SchedulingState::Idle;
        loop {
            let next = match current {
                SchedulingState::Idle => SchedulingState::Scheduling,
                SchedulingState::Scheduling => SchedulingState::SchedulingPending,
                SchedulingState::SchedulingPending => return false,
            };
            match self.cas(current, next) {
                Ok(()) => return current == SchedulingState::Idle,
                Err(actual) => current = actual,
            }
        }
    }

    /// Called by the scheduling thread when it has run out of work.
    ///
    /// Returns `true` when a wake-up was coalesced during the pass and the
    /// caller must recheck readiness; `false` once the state is back to `Idle`.
    pub fn end(&self) -> bool {
        loop {
            if self
                .cas(SchedulingState::SchedulingPending, SchedulingState::Scheduling)
                .is_ok()
            {
                return true;
            }
            if self
                .cas(SchedulingState::Scheduling, SchedulingState::Idle)
                .is_ok()
            {
                return false;
            }
            // Not the scheduling thread's state to end.
            if self.get() == SchedulingState::Idle {
                return false;
            }
        }
    }
}

impl Default for SchedulingCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle status. `Active` is only used by source nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum NodeStatus {
    Uninitialized = 0,
    Prepared = 1,
    Opened = 2,
    Active = 3,
    Closed = 4,
}

impl NodeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => NodeStatus::Prepared,
            2 => NodeStatus::Opened,
            3 => NodeStatus::Active,
            4 => NodeStatus::Closed,
            _ => NodeStatus::Uninitialized,
        }
    }

    /// Whether the scheduling loop may start invocations in this status.
    pub fn is_runnable(self) -> bool {
        matches!(self, NodeStatus::Opened | NodeStatus::Active)
    }
}

#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(NodeStatus::Uninitialized as u8))
    }

    pub fn get(&self) -> NodeStatus {
        NodeStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: NodeStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Move `from` → `to`; on failure returns the status actually found.
    pub fn transition(&self, from: NodeStatus, to: NodeStatus) -> Result<(), NodeStatus> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(NodeStatus::from_u8)
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
