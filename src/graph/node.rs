// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Nodes: one operation plus its typed ports and bindings.
//!
//! A [`Node`] declares the inputs its operation consumes and the outputs it produces. Each
//! input can be bound in exactly one way: a static parameter, an iterable (fan-out axis), or
//! an incoming connection. The first two are recorded on the node itself and checked here;
//! connections live on the [`Graph`](crate::graph::Graph), which checks the remaining
//! combinations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::errors::{Binding, ConstructionError};
use crate::graph::{Value, ValueType};
use crate::traits::Operation;

/// A named input port.
#[derive(Debug, Clone, PartialEq)]
pub struct InputPort {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
}

impl InputPort {
    pub fn required(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            required: true,
        }
    }

    pub fn optional(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            required: false,
        }
    }
}

/// A named output port.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPort {
    pub name: String,
    pub value_type: ValueType,
}

impl OutputPort {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            value_type,
        }
    }
}

/// An input whose value ranges over a fixed, ordered set.
#[derive(Debug, Clone, PartialEq)]
pub struct Iterable {
    pub input: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Operation,
    /// Terminal node copying results into the final output tree.
    Sink,
}

/// A unit of work in a pipeline graph.
#[derive(Clone)]
pub struct Node {
    name: String,
    inputs: BTreeMap<String, InputPort>,
    outputs: BTreeMap<String, OutputPort>,
    parameters: BTreeMap<String, Value>,
    iterable: Option<Iterable>,
    kind: NodeKind,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    operation: Arc<dyn Operation>,
}

impl Node {
    /// Declares a node wrapping `operation`.
    ///
    /// # Example
    /// ```
    /// use preflow::backends::IdentityOperation;
    /// use preflow::graph::{InputPort, Node, OutputPort, ValueType};
    ///
    /// let node = Node::declare(
    ///     "func_source",
    ///     vec![InputPort::required("scan", ValueType::File)],
    ///     vec![OutputPort::new("scan", ValueType::File)],
    ///     IdentityOperation::new(&["scan"]),
    /// );
    /// assert_eq!(node.name(), "func_source");
    /// ```
    pub fn declare(
        name: &str,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
        operation: impl Operation + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            inputs: inputs.into_iter().map(|p| (p.name.clone(), p)).collect(),
            outputs: outputs.into_iter().map(|p| (p.name.clone(), p)).collect(),
            parameters: BTreeMap::new(),
            iterable: None,
            kind: NodeKind::Operation,
            timeout: None,
            retry: None,
            operation: Arc::new(operation),
        }
    }

    pub fn with_input(mut self, port: InputPort) -> Self {
        self.inputs.insert(port.name.clone(), port);
        self
    }

    pub fn with_output(mut self, port: OutputPort) -> Self {
        self.outputs.insert(port.name.clone(), port);
        self
    }

    /// Overrides the executor's default wall-clock limit for this node.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the executor's default retry policy for this node.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub(crate) fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Binds a static value to an input.
    pub fn set_parameter(
        &mut self,
        input: &str,
        value: impl Into<Value>,
    ) -> Result<(), ConstructionError> {
        let value = value.into();
        let port = self.input_port(input)?;
        if !value.conforms_to(port.value_type) {
            return Err(ConstructionError::TypeMismatch {
                node: self.name.clone(),
                input: input.to_string(),
                expected: port.value_type,
                found: value.value_type(),
            });
        }
        if self.is_iterable_input(input) {
            return Err(self.already_bound(input, Binding::Iterable));
        }
        let value = value.bound_to(port.value_type);
        self.parameters.insert(input.to_string(), value);
        Ok(())
    }

    /// Marks an input as a fan-out axis over `values`.
    pub fn mark_iterable(
        &mut self,
        input: &str,
        values: Vec<Value>,
    ) -> Result<(), ConstructionError> {
        let port = self.input_port(input)?;
        let expected = port.value_type;
        if expected == ValueType::List {
            return Err(ConstructionError::NotScalar {
                node: self.name.clone(),
                input: input.to_string(),
            });
        }
        if self.parameters.contains_key(input) {
            return Err(self.already_bound(input, Binding::Parameter));
        }
        if let Some(existing) = &self.iterable {
            return Err(ConstructionError::IterableAlreadyDeclared {
                node: self.name.clone(),
                existing: existing.input.clone(),
            });
        }
        if values.is_empty() {
            return Err(ConstructionError::EmptyIterable {
                node: self.name.clone(),
                input: input.to_string(),
            });
        }
        let values: Vec<Value> = values.into_iter().map(|v| v.bound_to(expected)).collect();
        for (i, value) in values.iter().enumerate() {
            if matches!(value, Value::List(_)) || !value.conforms_to(expected) {
                return Err(ConstructionError::TypeMismatch {
                    node: self.name.clone(),
                    input: input.to_string(),
                    expected,
                    found: value.value_type(),
                });
            }
            if values[..i].contains(value) {
                return Err(ConstructionError::DuplicateIterableValue {
                    node: self.name.clone(),
                    input: input.to_string(),
                    value: value.to_string(),
                });
            }
        }

        self.iterable = Some(Iterable {
            input: input.to_string(),
            values,
        });
        Ok(())
    }

    fn input_port(&self, input: &str) -> Result<&InputPort, ConstructionError> {
        self.inputs
            .get(input)
            .ok_or_else(|| ConstructionError::UnknownInput {
                node: self.name.clone(),
                input: input.to_string(),
            })
    }

    fn already_bound(&self, input: &str, existing: Binding) -> ConstructionError {
        ConstructionError::AlreadyBound {
            node: self.name.clone(),
            input: input.to_string(),
            existing,
        }
    }

    fn is_iterable_input(&self, input: &str) -> bool {
        self.iterable.as_ref().is_some_and(|it| it.input == input)
    }

    /// How an input is bound on the node itself, ignoring connections.
    pub fn local_binding(&self, input: &str) -> Option<Binding> {
        if self.parameters.contains_key(input) {
            Some(Binding::Parameter)
        } else if self.is_iterable_input(input) {
            Some(Binding::Iterable)
        } else {
            None
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> impl Iterator<Item = &InputPort> {
        self.inputs.values()
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.get(name)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OutputPort> {
        self.outputs.values()
    }

    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn iterable(&self) -> Option<&Iterable> {
        self.iterable.as_ref()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_sink(&self) -> bool {
        self.kind == NodeKind::Sink
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn operation(&self) -> Arc<dyn Operation> {
        Arc::clone(&self.operation)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("operation", &self.operation.name())
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("parameters", &self.parameters)
            .field("iterable", &self.iterable)
            .field("kind", &self.kind)
            .finish()
    }
}
