// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Priority-based ready queue for node instances.
//!
//! Instances enter the queue once every upstream instance they depend on has completed.
//! The scheduler then pops them in priority order until its worker pool is full.
//!
//! # Priority Ordering
//!
//! Tasks are ordered by:
//! 1. **Topological Rank** (higher = higher priority), so deeper nodes of a run instance
//!    finish before shallow nodes of other run instances start
//! 2. **Expansion Order** (lower sequence first), which keeps scheduling deterministic
//!
//! # Examples
//!
//! ```rust
//! use preflow::engine::priority_work_queue::{PriorityWorkQueue, PrioritizedTask};
//!
//! let mut queue = PriorityWorkQueue::new();
//! queue.push(PrioritizedTask::new(0, 0, 0));
//! queue.push(PrioritizedTask::new(3, 2, 3));
//! queue.push(PrioritizedTask::new(2, 2, 2));
//!
//! assert_eq!(queue.pop(), Some(2));
//! assert_eq!(queue.pop(), Some(3));
//! assert_eq!(queue.pop(), Some(0));
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A node instance ready for execution.
#[derive(Debug, Clone, Copy)]
pub struct PrioritizedTask {
    /// Index into `ExpansionPlan::instances`.
    pub instance: usize,
    /// Depth of the instance's node in the graph.
    pub rank: usize,
    /// Position in expansion order; the tie-breaker.
    pub sequence: usize,
}

impl PrioritizedTask {
    pub fn new(instance: usize, rank: usize, sequence: usize) -> Self {
        Self {
            instance,
            rank,
            sequence,
        }
    }
}

impl PartialEq for PrioritizedTask {
    /// Two tasks are equal if they schedule the same instance.
    fn eq(&self, other: &Self) -> bool {
        self.instance == other.instance
    }
}

impl Eq for PrioritizedTask {}

impl PartialOrd for PrioritizedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedTask {
    /// `BinaryHeap` is a max-heap: higher ranks are popped first, then earlier sequence
    /// numbers, then lower instance indexes.
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.instance.cmp(&self.instance))
    }
}

/// Ready queue owned by the scheduling loop.
#[derive(Debug, Default)]
pub struct PriorityWorkQueue {
    heap: BinaryHeap<PrioritizedTask>,
}

impl PriorityWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: PrioritizedTask) {
        self.heap.push(task);
    }

    pub fn extend<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = PrioritizedTask>,
    {
        self.heap.extend(tasks);
    }

    /// Removes the highest priority task and returns its instance index.
    pub fn pop(&mut self) -> Option<usize> {
        self.heap.pop().map(|task| task.instance)
    }

    /// Empties the queue, returning the instance indexes that were still waiting.
    pub fn drain(&mut self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.heap.drain().map(|task| task.instance).collect();
        remaining.sort_unstable();
        remaining
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
