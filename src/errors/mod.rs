// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod execution;
mod graph;

pub use config::ConfigError;
pub use execution::{CacheCorruptionError, ExecutionError, FailureStrategy, NodeFailure, RunError};
pub use graph::{Binding, ConstructionError, ExpansionError};
