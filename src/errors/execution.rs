// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors and policies for graph execution.

use crate::errors::{ConstructionError, ExpansionError};
use crate::graph::Value;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// An operation failed or exited with a non-zero status.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Node '{node}' failed: {message}")]
pub struct ExecutionError {
    pub node: String,
    pub message: String,
    pub exit_status: Option<i32>,
    /// Outputs the operation managed to produce before failing.
    pub partial_outputs: BTreeMap<String, Value>,
}

/// A working directory recorded as completed is missing outputs it claims to hold.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "Cache for '{instance}' in {} is corrupt: missing {}",
    .working_directory.display(),
    .missing.join(", ")
)]
pub struct CacheCorruptionError {
    pub instance: String,
    pub working_directory: PathBuf,
    pub missing: Vec<String>,
}

/// Why a node instance ended in the `Failed` state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeFailure {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Node '{node}' timed out after {limit:?}")]
    Timeout { node: String, limit: Duration },

    #[error(transparent)]
    CacheCorruption(#[from] CacheCorruptionError),

    #[error("Could not resolve inputs of '{node}': {message}")]
    InputResolution { node: String, message: String },

    #[error("Internal error in '{node}': {message}")]
    Internal { node: String, message: String },
}

/// Errors returned by `WorkQueueExecutor::run`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Graph validation failed:\n{}", format_errors(.0))]
    Construction(Vec<ConstructionError>),

    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} node instance(s) failed, first: {}", .failures.len(), first_failure(.failures))]
    Failed { failures: Vec<(String, NodeFailure)> },
}

fn format_errors(errors: &[ConstructionError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_failure(failures: &[(String, NodeFailure)]) -> String {
    failures
        .first()
        .map(|(instance, failure)| format!("{}: {}", instance, failure))
        .unwrap_or_default()
}

/// How the scheduler reacts to the first failed node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Stop scheduling new nodes; unscheduled nodes end `Cancelled`.
    FailFast,
    /// Block descendants of the failure and keep running everything else.
    #[default]
    ContinueOnError,
}
