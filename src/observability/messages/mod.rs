// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for the human-readable line and
//! [`StructuredLog`] to emit the same event with machine-readable fields.
//!
//! # Organization
//!
//! * `engine` - Run lifecycle (start, completion, failure, cancellation)
//! * `node` - Node instance lifecycle, cache decisions, external commands, sink copies
//! * `validation` - Graph validation results
//! * `expansion` - Iterable expansion results

pub mod engine;
pub mod expansion;
pub mod node;
pub mod validation;

use tracing::Span;

/// A message that knows its own log level and structured fields.
pub trait StructuredLog {
    /// Emits the message as a tracing event.
    fn log(&self);

    /// Builds a span carrying the message's fields.
    fn span(&self, name: &str) -> Span;
}
