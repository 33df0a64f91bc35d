// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! What a run did, per node instance and per run instance.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::state::{NodeState, RunStatus};
use crate::errors::{NodeFailure, RunError};
use crate::graph::Value;

/// Final state of one node instance.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub instance: String,
    pub node: String,
    pub discriminator: String,
    pub state: NodeState,
    pub working_directory: PathBuf,
    /// Outputs of a completed instance, or whatever a failed one managed to produce.
    pub outputs: BTreeMap<String, Value>,
    /// Invocations of the operation; 0 for cache hits and instances that never started.
    pub attempts: u32,
    pub duration: Duration,
    pub cache_key: Option<String>,
}

impl NodeReport {
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunInstanceReport {
    pub discriminator: String,
    pub status: RunStatus,
    /// Instance ids of the members, in expansion order.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub graph: String,
    /// Node instances in expansion order.
    pub nodes: Vec<NodeReport>,
    pub run_instances: Vec<RunInstanceReport>,
    pub status: RunStatus,
    /// Operation invocations performed during this run, retries included.
    pub invocations: usize,
    pub duration: Duration,
}

impl RunReport {
    pub fn node(&self, instance: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.instance == instance)
    }

    pub fn state(&self, instance: &str) -> Option<&NodeState> {
        self.node(instance).map(|n| &n.state)
    }

    pub fn run_instance(&self, discriminator: &str) -> Option<&RunInstanceReport> {
        self.run_instances
            .iter()
            .find(|r| r.discriminator == discriminator)
    }

    /// Instances that failed on their own, with the reason. Blocked instances are not listed.
    pub fn failures(&self) -> Vec<(&str, &NodeFailure)> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.state {
                NodeState::Failed(failure) => Some((n.instance.as_str(), failure)),
                _ => None,
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Turns a report with failures into [`RunError::Failed`].
    pub fn into_result(self) -> Result<RunReport, RunError> {
        let failures: Vec<(String, NodeFailure)> = self
            .failures()
            .into_iter()
            .map(|(instance, failure)| (instance.to_string(), failure.clone()))
            .collect();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(RunError::Failed { failures })
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run of '{}' {} in {:.2?} ({} instances, {} invocations)",
            self.graph,
            self.status,
            self.duration,
            self.nodes.len(),
            self.invocations
        )?;

        let width = self.nodes.iter().map(|n| n.instance.len()).max().unwrap_or(0);
        for node in &self.nodes {
            write!(f, "  {:<width$}  {:<9}", node.instance, node.state.label(), width = width)?;
            match &node.state {
                NodeState::Failed(failure) => write!(f, "  {}", failure)?,
                NodeState::Blocked { origin } => write!(f, "  by {}", origin)?,
                NodeState::Completed { cached: false } => write!(f, "  {:.2?}", node.duration)?,
                _ => {}
            }
            writeln!(f)?;
        }

        if self.run_instances.len() > 1 {
            writeln!(f, "Run instances:")?;
            for run in &self.run_instances {
                writeln!(f, "  {}  {}", run.discriminator, run.status)?;
            }
        }
        Ok(())
    }
}
