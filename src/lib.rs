// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backends;   // operation implementations
pub mod config;     // engine configuration
pub mod engine;     // scheduler, cache, reports
pub mod errors;     // error handling
pub mod expansion;  // iterable fan-out
pub mod graph;      // nodes, connections, validation
pub mod observability;
pub mod traits;     // operation contract
