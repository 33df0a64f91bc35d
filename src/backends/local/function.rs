// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::graph::Value;
use crate::traits::{Invocation, Invoked, Operation, OperationError};

type Func = dyn Fn(&BTreeMap<String, Value>, &Path) -> Result<BTreeMap<String, Value>, OperationError>
    + Send
    + Sync;

/// Runs an in-process function over the resolved inputs.
///
/// The function receives the resolved parameters and the working directory and returns the
/// node's outputs. It runs on tokio's blocking pool, so it may do file I/O freely.
pub struct FunctionOperation {
    name: &'static str,
    version: Option<String>,
    func: Arc<Func>,
}

impl FunctionOperation {
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&BTreeMap<String, Value>, &Path) -> Result<BTreeMap<String, Value>, OperationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            version: None,
            func: Arc::new(func),
        }
    }

    /// Bump the version whenever the function body changes behavior; cached results of
    /// earlier versions are then discarded.
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

#[async_trait]
impl Operation for FunctionOperation {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError> {
        let func = Arc::clone(&self.func);
        let parameters = invocation.parameters.clone();
        let working_directory = invocation.working_directory.clone();

        let outputs = tokio::task::spawn_blocking(move || func(&parameters, &working_directory))
            .await
            .map_err(|e| OperationError::new(format!("function panicked: {}", e)))??;

        Ok(Invoked::success(outputs))
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn fingerprint(&self) -> String {
        match &self.version {
            Some(version) => format!("function:{}@{}", self.name, version),
            None => format!("function:{}", self.name),
        }
    }
}
