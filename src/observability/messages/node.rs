// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for node instance events.
//!
//! This module contains message types for logging events related to:
//! * Node instance execution lifecycle (start, retry, completion, failure)
//! * Cache decisions (hits, stale directories)
//! * Propagation of failures and cancellation
//! * External commands and sink copies

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;
use tracing::Span;

/// A node instance is about to invoke its operation.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use preflow::observability::messages::node::NodeStarted;
///
/// let msg = NodeStarted {
///     instance: "_fwhm_4/smooth",
///     operation: "command",
///     attempt: 1,
///     max_attempts: 3,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct NodeStarted<'a> {
    pub instance: &'a str,
    pub operation: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl Display for NodeStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Running '{}' ({}), attempt {}/{}",
            self.instance, self.operation, self.attempt, self.max_attempts
        )
    }
}

impl StructuredLog for NodeStarted<'_> {
    fn log(&self) {
        tracing::info!(
            instance = self.instance,
            operation = self.operation,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "node",
            span_name = name,
            instance = self.instance,
            operation = self.operation,
        )
    }
}

/// A node instance finished and its outputs were recorded.
///
/// # Log Level
/// `info!` - Important operational event
pub struct NodeCompleted<'a> {
    pub instance: &'a str,
    pub output_count: usize,
    pub duration: Duration,
}

impl Display for NodeCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "'{}' completed with {} outputs in {:?}",
            self.instance, self.output_count, self.duration
        )
    }
}

impl StructuredLog for NodeCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            instance = self.instance,
            output_count = self.output_count,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "node_completed",
            span_name = name,
            instance = self.instance,
            duration = ?self.duration,
        )
    }
}

/// A node instance was skipped because its working directory holds matching results.
///
/// # Log Level
/// `info!` - Important operational event
pub struct NodeCacheHit<'a> {
    pub instance: &'a str,
    pub cache_key: &'a str,
}

impl Display for NodeCacheHit<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "'{}' is up to date, skipping", self.instance)
    }
}

impl StructuredLog for NodeCacheHit<'_> {
    fn log(&self) {
        tracing::info!(
            instance = self.instance,
            cache_key = self.cache_key,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("cache_hit", span_name = name, instance = self.instance)
    }
}

/// A working directory from an earlier run no longer matches and was cleared.
///
/// # Log Level
/// `debug!` - Diagnostic detail
pub struct StaleCacheRemoved<'a> {
    pub instance: &'a str,
    pub working_directory: &'a Path,
}

impl Display for StaleCacheRemoved<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Inputs of '{}' changed, clearing {}",
            self.instance,
            self.working_directory.display()
        )
    }
}

impl StructuredLog for StaleCacheRemoved<'_> {
    fn log(&self) {
        tracing::debug!(
            instance = self.instance,
            working_directory = %self.working_directory.display(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("stale_cache", span_name = name, instance = self.instance)
    }
}

/// An attempt failed and the node will be invoked again after `delay`.
///
/// # Log Level
/// `warn!` - Recoverable problem
pub struct NodeRetrying<'a> {
    pub instance: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub error: &'a dyn std::error::Error,
}

impl Display for NodeRetrying<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Attempt {}/{} of '{}' failed ({}), retrying in {:?}",
            self.attempt, self.max_attempts, self.instance, self.error, self.delay
        )
    }
}

impl StructuredLog for NodeRetrying<'_> {
    fn log(&self) {
        tracing::warn!(
            instance = self.instance,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            delay_ms = self.delay.as_millis() as u64,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "node_retry",
            span_name = name,
            instance = self.instance,
            attempt = self.attempt,
        )
    }
}

/// A node instance failed for good.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use preflow::observability::messages::node::NodeFailed;
///
/// let error = std::io::Error::new(std::io::ErrorKind::Other, "bet exited with status 1");
/// let msg = NodeFailed {
///     instance: "skullstrip",
///     error: &error,
/// };
///
/// tracing::error!("{}", msg);
/// ```
pub struct NodeFailed<'a> {
    pub instance: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for NodeFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "'{}' failed: {}", self.instance, self.error)
    }
}

impl StructuredLog for NodeFailed<'_> {
    fn log(&self) {
        tracing::error!(
            instance = self.instance,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "node_failed",
            span_name = name,
            instance = self.instance,
            error = %self.error,
        )
    }
}

/// A node instance will not run because an upstream instance failed.
///
/// # Log Level
/// `warn!` - Consequence of an earlier failure
pub struct NodeBlocked<'a> {
    pub instance: &'a str,
    pub origin: &'a str,
}

impl Display for NodeBlocked<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "'{}' blocked by failure of '{}'", self.instance, self.origin)
    }
}

impl StructuredLog for NodeBlocked<'_> {
    fn log(&self) {
        tracing::warn!(
            instance = self.instance,
            origin = self.origin,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "node_blocked",
            span_name = name,
            instance = self.instance,
            origin = self.origin,
        )
    }
}

/// A node instance will not run because the run, or all its run instances, were cancelled.
///
/// # Log Level
/// `warn!` - Operator intervention
pub struct NodeCancelled<'a> {
    pub instance: &'a str,
}

impl Display for NodeCancelled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "'{}' cancelled", self.instance)
    }
}

impl StructuredLog for NodeCancelled<'_> {
    fn log(&self) {
        tracing::warn!(instance = self.instance, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("node_cancelled", span_name = name, instance = self.instance)
    }
}

/// An external command is being launched.
///
/// # Log Level
/// `debug!` - Diagnostic detail
pub struct CommandLaunched<'a> {
    pub instance: &'a str,
    pub program: &'a str,
    pub arg_count: usize,
}

impl Display for CommandLaunched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "'{}' launching {} with {} arguments",
            self.instance, self.program, self.arg_count
        )
    }
}

impl StructuredLog for CommandLaunched<'_> {
    fn log(&self) {
        tracing::debug!(
            instance = self.instance,
            program = self.program,
            arg_count = self.arg_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "command",
            span_name = name,
            instance = self.instance,
            program = self.program,
        )
    }
}

/// An external command exited.
///
/// # Log Level
/// `debug!` on success, `warn!` on a non-zero status
pub struct CommandExited<'a> {
    pub instance: &'a str,
    pub program: &'a str,
    pub exit_status: i32,
    pub duration: Duration,
}

impl Display for CommandExited<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "'{}': {} exited with status {} after {:?}",
            self.instance, self.program, self.exit_status, self.duration
        )
    }
}

impl StructuredLog for CommandExited<'_> {
    fn log(&self) {
        if self.exit_status == 0 {
            tracing::debug!(
                instance = self.instance,
                program = self.program,
                exit_status = self.exit_status,
                duration_ms = self.duration.as_millis() as u64,
                "{}", self
            );
        } else {
            tracing::warn!(
                instance = self.instance,
                program = self.program,
                exit_status = self.exit_status,
                duration_ms = self.duration.as_millis() as u64,
                "{}", self
            );
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "command_exited",
            span_name = name,
            instance = self.instance,
            exit_status = self.exit_status,
        )
    }
}

/// A sink copied one file into the output tree.
///
/// # Log Level
/// `debug!` - Diagnostic detail
pub struct SinkFileCopied<'a> {
    pub instance: &'a str,
    pub source: &'a Path,
    pub destination: &'a Path,
}

impl Display for SinkFileCopied<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "'{}' copied {} -> {}",
            self.instance,
            self.source.display(),
            self.destination.display()
        )
    }
}

impl StructuredLog for SinkFileCopied<'_> {
    fn log(&self) {
        tracing::debug!(
            instance = self.instance,
            source = %self.source.display(),
            destination = %self.destination.display(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("sink_copy", span_name = name, instance = self.instance)
    }
}
