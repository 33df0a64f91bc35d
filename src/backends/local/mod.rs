// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-process operations.

mod function;
mod identity;
mod merge;

pub use function::FunctionOperation;
pub use identity::IdentityOperation;
pub use merge::MergeOperation;
