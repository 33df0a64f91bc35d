// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Handle for cancelling a run from outside the executor.
///
/// Clones share state, so one clone can be handed to the executor while another stays with
/// the caller (a signal handler, a UI, a test).
///
/// ```
/// use preflow::engine::RunControl;
///
/// let control = RunControl::new();
/// let handle = control.clone();
/// handle.cancel();
/// assert!(control.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    cancelled_instances: Arc<Mutex<HashSet<String>>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the whole run: nothing new is scheduled and in-flight invocations are aborted.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels one run instance by discriminator. Node instances are skipped once every run
    /// instance they belong to is cancelled; invocations already running are left to finish.
    pub async fn cancel_instance(&self, discriminator: &str) {
        self.cancelled_instances
            .lock()
            .await
            .insert(discriminator.to_string());
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn is_instance_cancelled(&self, discriminator: &str) -> bool {
        self.token.is_cancelled() || self.cancelled_instances.lock().await.contains(discriminator)
    }

    /// Whether every one of `discriminators` has been cancelled. False for an empty set.
    pub(crate) async fn covers_all<'a>(
        &self,
        discriminators: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        let mut any = false;
        for discriminator in discriminators {
            if !self.is_instance_cancelled(discriminator).await {
                return false;
            }
            any = true;
        }
        any
    }

    pub(crate) async fn cancelled_instances(&self) -> Vec<String> {
        let mut cancelled: Vec<String> = self.cancelled_instances.lock().await.iter().cloned().collect();
        cancelled.sort();
        cancelled
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}
