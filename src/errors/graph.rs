// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised while building, validating and expanding a graph.

use crate::graph::ValueType;
use thiserror::Error;

/// How an input is currently bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Parameter,
    Connection,
    Iterable,
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Binding::Parameter => "a static parameter",
            Binding::Connection => "a connection",
            Binding::Iterable => "an iterable",
        };
        write!(f, "{}", name)
    }
}

/// Errors detected while a graph is constructed or validated.
///
/// Binding errors are returned immediately by the construction call that caused them;
/// structural errors (unbound inputs, cycles) are accumulated by `Graph::validate`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("Node '{node}' does not exist")]
    UnknownNode { node: String },

    #[error("Duplicate node name: '{node}'")]
    DuplicateNode { node: String },

    #[error("Node '{node}' has no input named '{input}'")]
    UnknownInput { node: String, input: String },

    #[error("Node '{node}' has no output named '{output}'")]
    UnknownOutput { node: String, output: String },

    #[error("Input '{node}.{input}' is already bound by {existing}")]
    AlreadyBound {
        node: String,
        input: String,
        existing: Binding,
    },

    #[error("Destination '{node}.{input}' is already bound by {existing}")]
    DestinationAlreadyBound {
        node: String,
        input: String,
        existing: Binding,
    },

    #[error("Type mismatch at '{node}.{input}': expected {expected}, found {found}")]
    TypeMismatch {
        node: String,
        input: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("Input '{node}.{input}' is list-typed and cannot be iterable")]
    NotScalar { node: String, input: String },

    #[error("Iterable '{node}.{input}' has no values")]
    EmptyIterable { node: String, input: String },

    #[error("Iterable '{node}.{input}' lists value '{value}' more than once")]
    DuplicateIterableValue {
        node: String,
        input: String,
        value: String,
    },

    #[error("Node '{node}' already iterates over '{existing}'")]
    IterableAlreadyDeclared { node: String, existing: String },

    #[error("Required input '{node}.{input}' is not bound")]
    UnboundInput { node: String, input: String },

    #[error("Sink '{node}' has downstream consumers")]
    SinkHasConsumers { node: String },

    #[error("Cyclic dependency detected: {}", .cycle_path.join(" -> "))]
    Cycle { cycle_path: Vec<String> },
}

/// Errors that halt iterable expansion before anything executes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpansionError {
    #[error(
        "Iterable '{downstream_node}.{downstream_input}' is downstream of iterable \
         '{upstream_node}.{upstream_input}'; dependent axes cannot be expanded"
    )]
    IterableConflict {
        upstream_node: String,
        upstream_input: String,
        downstream_node: String,
        downstream_input: String,
    },

    #[error("Iterable '{node}.{input}' produces the discriminator '{segment}' for more than one value")]
    DiscriminatorCollision {
        node: String,
        input: String,
        segment: String,
    },

    #[error("Cannot expand a cyclic graph: {}", .cycle_path.join(" -> "))]
    Cyclic { cycle_path: Vec<String> },
}
