// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::graph::Value;
use crate::traits::{Invocation, Invoked, Operation, OperationError};

/// Writes one small file per declared output and counts how often it was invoked.
///
/// The file content depends on the resolved parameters, so a changed upstream value yields
/// a changed file downstream.
pub struct CountingOperation {
    outputs: Vec<String>,
    invocations: Arc<AtomicUsize>,
}

impl CountingOperation {
    pub fn new(outputs: &[&str]) -> Self {
        Self {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shares an existing counter, so several nodes can be tallied together.
    pub fn with_counter(outputs: &[&str], invocations: Arc<AtomicUsize>) -> Self {
        Self {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            invocations,
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl Operation for CountingOperation {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let content = invocation
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        let mut outputs = BTreeMap::new();
        for output in &self.outputs {
            let path = invocation.working_directory.join(format!("{}.out", output));
            tokio::fs::write(&path, format!("{}\n{}\n", invocation.instance, content)).await?;
            outputs.insert(output.clone(), Value::Path(path));
        }
        Ok(Invoked::success(outputs))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// An operation that fails, optionally only for its first `n` invocations. Every failed
/// attempt leaves an `attempt_<n>.partial` file behind.
pub struct FailingOperation {
    message: String,
    exit_status: i32,
    fail_times: Option<usize>,
    outputs: Vec<String>,
    invocations: Arc<AtomicUsize>,
}

impl FailingOperation {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            exit_status: 1,
            fail_times: None,
            outputs: Vec::new(),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails `times` times, then behaves like a `CountingOperation` over `outputs`.
    pub fn flaky(message: &str, times: usize, outputs: &[&str]) -> Self {
        Self {
            fail_times: Some(times),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            ..Self::new(message)
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl Operation for FailingOperation {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError> {
        let attempt = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_times.map_or(true, |times| attempt <= times) {
            let leftover = invocation.working_directory.join(format!("attempt_{}.partial", attempt));
            tokio::fs::write(&leftover, &invocation.instance).await?;
            return Err(OperationError::new(self.message.clone()).with_exit_status(self.exit_status));
        }

        let mut outputs = BTreeMap::new();
        for output in &self.outputs {
            let path = invocation.working_directory.join(format!("{}.out", output));
            tokio::fs::write(&path, &invocation.instance).await?;
            outputs.insert(output.clone(), Value::Path(path));
        }
        Ok(Invoked::success(outputs))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Sleeps before producing nothing; used to exercise timeouts and cancellation.
pub struct SleepingOperation {
    duration: Duration,
    invocations: Arc<AtomicUsize>,
}

impl SleepingOperation {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl Operation for SleepingOperation {
    async fn invoke(&self, _invocation: &Invocation) -> Result<Invoked, OperationError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        Ok(Invoked::success(BTreeMap::new()))
    }

    fn name(&self) -> &'static str {
        "sleeping"
    }
}

/// Reports a non-zero exit status without returning an error.
pub struct NonZeroExitOperation;

#[async_trait]
impl Operation for NonZeroExitOperation {
    async fn invoke(&self, _invocation: &Invocation) -> Result<Invoked, OperationError> {
        Ok(Invoked {
            outputs: BTreeMap::new(),
            exit_status: 3,
        })
    }

    fn name(&self) -> &'static str {
        "non_zero_exit"
    }
}

/// Panics while describing itself, which ends the worker task rather than the invocation.
pub struct BrokenFingerprintOperation;

#[async_trait]
impl Operation for BrokenFingerprintOperation {
    async fn invoke(&self, _invocation: &Invocation) -> Result<Invoked, OperationError> {
        Ok(Invoked::success(BTreeMap::new()))
    }

    fn name(&self) -> &'static str {
        "broken_fingerprint"
    }

    fn fingerprint(&self) -> String {
        panic!("fingerprint unavailable")
    }
}
