// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod cache;
pub mod control;
pub mod priority_work_queue;
pub mod report;
pub mod state;
pub mod work_queue;
#[cfg(test)]
pub mod integration_tests;

pub use cache::{CacheLookup, NodeRecord};
pub use control::RunControl;
pub use report::{NodeReport, RunInstanceReport, RunReport};
pub use state::{NodeState, RunStatus};
pub use work_queue::WorkQueueExecutor;
