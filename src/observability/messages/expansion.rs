// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for iterable expansion.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Expansion produced a plan.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use preflow::observability::messages::expansion::ExpansionCompleted;
///
/// let msg = ExpansionCompleted {
///     graph: "sub-01",
///     axis_count: 2,
///     instance_count: 14,
///     run_instance_count: 6,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct ExpansionCompleted<'a> {
    pub graph: &'a str,
    pub axis_count: usize,
    pub instance_count: usize,
    pub run_instance_count: usize,
}

impl Display for ExpansionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Expanded '{}': {} iterable axes, {} node instances, {} run instances",
            self.graph, self.axis_count, self.instance_count, self.run_instance_count
        )
    }
}

impl StructuredLog for ExpansionCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            graph = self.graph,
            axis_count = self.axis_count,
            instance_count = self.instance_count,
            run_instance_count = self.run_instance_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "expansion",
            span_name = name,
            graph = self.graph,
            axis_count = self.axis_count,
        )
    }
}

/// Two iterable axes lie on one dependency chain.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct AxisConflictDetected<'a> {
    pub graph: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for AxisConflictDetected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cannot expand '{}': {}", self.graph, self.error)
    }
}

impl StructuredLog for AxisConflictDetected<'_> {
    fn log(&self) {
        tracing::error!(
            graph = self.graph,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!("axis_conflict", span_name = name, graph = self.graph)
    }
}
