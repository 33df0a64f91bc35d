// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for diagnostic and operational logging.
//! Message types follow a struct-based pattern with `Display` implemented to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep log wording in one place per subsystem
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - Run lifecycle events
//! * `messages::node` - Node instance execution, caching and external tool events
//! * `messages::validation` - Graph validation events
//! * `messages::expansion` - Iterable expansion events
//!
//! # Usage
//!
//! ```rust
//! use preflow::observability::messages::node::NodeBlocked;
//! use preflow::observability::messages::StructuredLog;
//!
//! NodeBlocked {
//!     instance: "_fwhm_4/smooth",
//!     origin: "realign",
//! }
//! .log();
//! ```

pub mod messages;
