// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::errors::NodeFailure;

/// Lifecycle of one node instance during a run.
///
/// ```text
/// Pending -> Ready -> Running -> Completed { cached }
///                             -> Failed(reason)
/// Pending -> Blocked { origin }   (an upstream instance failed)
/// Pending | Ready -> Cancelled
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Completed { cached: bool },
    Failed(NodeFailure),
    /// `origin` is the id of the failed instance this one depends on.
    Blocked { origin: String },
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Completed { .. }
                | NodeState::Failed(_)
                | NodeState::Blocked { .. }
                | NodeState::Cancelled
        )
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, NodeState::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Completed { cached: true } => "cached",
            NodeState::Completed { cached: false } => "completed",
            NodeState::Failed(_) => "failed",
            NodeState::Blocked { .. } => "blocked",
            NodeState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Failed(failure) => write!(f, "failed: {}", failure),
            NodeState::Blocked { origin } => write!(f, "blocked by '{}'", origin),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Outcome of a run instance, or of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// `Completed` iff every state completed, `Failed` if any failed or is blocked,
    /// `Cancelled` otherwise.
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a NodeState>) -> Self {
        let mut all_completed = true;
        for state in states {
            match state {
                NodeState::Failed(_) | NodeState::Blocked { .. } => return RunStatus::Failed,
                NodeState::Completed { .. } => {}
                _ => all_completed = false,
            }
        }
        if all_completed {
            RunStatus::Completed
        } else {
            RunStatus::Cancelled
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}
