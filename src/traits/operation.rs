// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The uniform contract between the engine and the external operations it runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ToolConfig;
use crate::graph::Value;

/// Everything an operation receives for one execution of one node instance.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Name of the node as declared in the graph.
    pub node: String,
    /// Id of the expanded node instance, e.g. `_fwhm_4/smooth`.
    pub instance: String,
    /// Discriminator of the iterable values this instance was expanded for; empty when shared.
    pub discriminator: String,
    /// Static parameters, iterable values and connected inputs, fully resolved.
    pub parameters: BTreeMap<String, Value>,
    /// Exclusive scratch and output directory of this instance. Already created.
    pub working_directory: PathBuf,
    pub tools: Arc<ToolConfig>,
}

impl Invocation {
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Looks up an input the operation cannot run without.
    pub fn require(&self, name: &str) -> Result<&Value, OperationError> {
        self.parameters
            .get(name)
            .ok_or_else(|| OperationError::new(format!("missing input '{}'", name)))
    }
}

/// Result of an invocation that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct Invoked {
    pub outputs: BTreeMap<String, Value>,
    /// Exit status of the underlying tool; anything but 0 is treated as a failure.
    pub exit_status: i32,
}

impl Invoked {
    pub fn success(outputs: BTreeMap<String, Value>) -> Self {
        Self {
            outputs,
            exit_status: 0,
        }
    }
}

/// An operation could not produce its outputs.
#[derive(Debug, Clone, Default, Error)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
    pub exit_status: Option<i32>,
    pub partial_outputs: BTreeMap<String, Value>,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_exit_status(mut self, status: i32) -> Self {
        self.exit_status = Some(status);
        self
    }

    pub fn with_partial_outputs(mut self, outputs: BTreeMap<String, Value>) -> Self {
        self.partial_outputs = outputs;
        self
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        OperationError::new(err.to_string())
    }
}

/// An externally implemented processing step (registration, smoothing, a copy into the
/// output tree, ...). The engine decides whether to call it; implementations only need to
/// write into the working directory they are given and report what they produced.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError>;

    fn name(&self) -> &'static str;

    /// Stable description of how this operation behaves, folded into cache keys so that
    /// changing e.g. a command template invalidates earlier results.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }
}
