//! Event queue
//!
//! A min-heap of timestamped events keyed by `(start_time, insertion_seq)`.
//! The sequence tie-break gives FIFO dispatch among equal timestamps, which
//! is mandatory for reproducibility.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::time::SimTime;
use crate::vm::VmId;
use crate::workflow::{TaskId, Workflow, WorkflowId};

/// Discriminant of an event, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SubmitWorkflow,
    ScheduleWorkflow,
    ScheduleTask,
    FinishTask,
    ManageResources,
}

/// An event with its payload
#[derive(Debug)]
pub enum EventKind {
    /// A workflow enters the simulation
    SubmitWorkflow { workflow: Box<Workflow> },
    /// Schedule the entry tasks of a submitted workflow
    ScheduleWorkflow { workflow_id: WorkflowId },
    /// Place one task on a VM
    ScheduleTask {
        workflow_id: WorkflowId,
        task_id: TaskId,
    },
    /// A task's execution completes on a VM
    FinishTask {
        workflow_id: WorkflowId,
        task_id: TaskId,
        vm_id: VmId,
    },
    /// Periodic resource deprovisioning hook
    ManageResources,
}

impl EventKind {
    /// The payload-free discriminant
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::SubmitWorkflow { .. } => EventType::SubmitWorkflow,
            EventKind::ScheduleWorkflow { .. } => EventType::ScheduleWorkflow,
            EventKind::ScheduleTask { .. } => EventType::ScheduleTask,
            EventKind::FinishTask { .. } => EventType::FinishTask,
            EventKind::ManageResources => EventType::ManageResources,
        }
    }
}

/// A timestamped event
#[derive(Debug)]
pub struct Event {
    /// Virtual time the event fires
    pub start_time: SimTime,
    /// Kind and payload
    pub kind: EventKind,
}

struct QueuedEvent {
    start_time: SimTime,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.start_time == other.start_time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start_time
            .cmp(&other.start_time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-heap event queue driving the simulation clock.
///
/// `current_time` is initialized by the first pop and advances with every
/// subsequent pop; handlers may only enqueue at or after it.
pub struct EventQueue {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    next_seq: u64,
    current_time: SimTime,
    started: bool,
}

impl EventQueue {
    /// Create an empty queue at the epoch
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            current_time: SimTime::ZERO,
            started: false,
        }
    }

    /// Enqueue an event.
    ///
    /// Once the clock has started, enqueueing into the past is a contract
    /// violation by the calling handler.
    pub fn push(&mut self, start_time: SimTime, kind: EventKind) {
        debug_assert!(
            !self.started || start_time >= self.current_time,
            "event enqueued in the past: {} < {}",
            start_time,
            self.current_time
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueuedEvent {
            start_time,
            seq,
            event: Event { start_time, kind },
        }));
    }

    /// Pop the next event and advance the clock to it
    pub fn pop(&mut self) -> Option<Event> {
        let Reverse(queued) = self.heap.pop()?;
        self.current_time = queued.start_time;
        self.started = true;
        Some(queued.event)
    }

    /// The type of the next event, without popping it
    pub fn peek_type(&self) -> Option<EventType> {
        self.heap
            .peek()
            .map(|Reverse(queued)| queued.event.kind.event_type())
    }

    /// The timestamp of the next event, without popping it
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|Reverse(queued)| queued.start_time)
    }

    /// The virtual time of the most recent pop
    pub fn current_time(&self) -> SimTime {
        self.current_time
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no events are pending
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
