// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod operation;

pub use operation::{Invocation, Invoked, Operation, OperationError};
