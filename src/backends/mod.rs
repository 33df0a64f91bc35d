// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Operation implementations for preprocessing pipelines.
//!
//! Every backend implements the [`Operation`](crate::traits::Operation) trait; the engine
//! treats them uniformly.
//!
//! # Available Backends
//!
//! ## Command
//! [`CommandOperation`] launches an external executable (FSL, AFNI, SPM through MATLAB, ...)
//! resolved through the executor's [`ToolConfig`](crate::config::ToolConfig), capturing its
//! output into the node's working directory.
//!
//! ## Local
//! In-process operations:
//! - **FunctionOperation**: a pure helper function over the resolved inputs
//! - **IdentityOperation**: forwards inputs unchanged, typically as an iterable source
//! - **MergeOperation**: gathers several inputs into one list
//!
//! ## Sink
//! [`Sink`] builds the terminal node that copies results into the organized output tree.
//!
//! ## Stub Backend (Test-Only)
//! Operations that count invocations, fail, or sleep. Only available in test builds.

pub mod command;
pub mod local;
pub mod sink;
#[cfg(test)]
pub mod stub;

pub use command::CommandOperation;
pub use local::{FunctionOperation, IdentityOperation, MergeOperation};
pub use sink::{Sink, SinkBuilder, SinkOperation, SINK_OUTPUT};
