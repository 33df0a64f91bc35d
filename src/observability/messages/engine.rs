// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for run lifecycle events.
//!
//! This module contains message types for logging events related to:
//! * Run start with its expanded size and concurrency
//! * Run completion, failure and cancellation

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// A run started.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use preflow::observability::messages::engine::ExecutionStarted;
///
/// let msg = ExecutionStarted {
///     graph: "sub-01",
///     instance_count: 12,
///     run_instance_count: 3,
///     max_workers: 4,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct ExecutionStarted<'a> {
    pub graph: &'a str,
    pub instance_count: usize,
    pub run_instance_count: usize,
    pub max_workers: usize,
}

impl Display for ExecutionStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting run of '{}': {} node instances across {} run instances, max_workers={}",
            self.graph, self.instance_count, self.run_instance_count, self.max_workers
        )
    }
}

impl StructuredLog for ExecutionStarted<'_> {
    fn log(&self) {
        tracing::info!(
            graph = self.graph,
            instance_count = self.instance_count,
            run_instance_count = self.run_instance_count,
            max_workers = self.max_workers,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "execution",
            span_name = name,
            graph = self.graph,
            instance_count = self.instance_count,
            run_instance_count = self.run_instance_count,
            max_workers = self.max_workers,
        )
    }
}

/// A run finished; `status` is the overall status of the report.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionCompleted<'a> {
    pub graph: &'a str,
    pub status: &'a str,
    pub instance_count: usize,
    pub invocations: usize,
    pub duration: Duration,
}

impl Display for ExecutionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Run of '{}' finished {}: {} node instances, {} invocations in {:?}",
            self.graph, self.status, self.instance_count, self.invocations, self.duration
        )
    }
}

impl StructuredLog for ExecutionCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            graph = self.graph,
            status = self.status,
            instance_count = self.instance_count,
            invocations = self.invocations,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "execution_completed",
            span_name = name,
            graph = self.graph,
            status = self.status,
            duration = ?self.duration,
        )
    }
}

/// A run could not start.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use preflow::observability::messages::engine::ExecutionFailed;
///
/// let error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
/// let msg = ExecutionFailed {
///     graph: "sub-01",
///     error: &error,
/// };
///
/// tracing::error!("{}", msg);
/// ```
pub struct ExecutionFailed<'a> {
    pub graph: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for ExecutionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Run of '{}' failed: {}", self.graph, self.error)
    }
}

impl StructuredLog for ExecutionFailed<'_> {
    fn log(&self) {
        tracing::error!(
            graph = self.graph,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "execution_failed",
            span_name = name,
            graph = self.graph,
            error = %self.error,
        )
    }
}

/// Cancellation was requested for a run or for some of its run instances.
///
/// # Log Level
/// `warn!` - Operator intervention
pub struct CancellationRequested<'a> {
    pub graph: &'a str,
    /// Discriminators of the cancelled run instances; empty for the whole run.
    pub run_instances: &'a [String],
}

impl Display for CancellationRequested<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.run_instances.is_empty() {
            write!(f, "Cancelling run of '{}'", self.graph)
        } else {
            write!(
                f,
                "Cancelling run instances {} of '{}'",
                self.run_instances.join(", "),
                self.graph
            )
        }
    }
}

impl StructuredLog for CancellationRequested<'_> {
    fn log(&self) {
        tracing::warn!(
            graph = self.graph,
            run_instances = self.run_instances.len(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "cancellation",
            span_name = name,
            graph = self.graph,
        )
    }
}
