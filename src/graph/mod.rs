// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Pipeline graphs: nodes, the connections between them, and the rules that keep them valid.
//!
//! A [`Graph`] owns its nodes (in declaration order, which expansion relies on for
//! determinism) and its connections. Nodes are referenced by name only; there are no shared
//! mutable node references. Binding rules are enforced as the graph is built, so a
//! construction call that would bind an input twice fails immediately. Structural checks
//! that only make sense once the graph is complete (unbound inputs, cycles) are performed by
//! [`Graph::validate`].
//!
//! # Example
//! ```
//! use preflow::backends::IdentityOperation;
//! use preflow::graph::{Graph, InputPort, Node, OutputPort, Value, ValueType};
//!
//! let mut graph = Graph::new("sub-01");
//! graph.add_node(Node::declare(
//!     "trim",
//!     vec![InputPort::required("in_file", ValueType::File)],
//!     vec![OutputPort::new("in_file", ValueType::File)],
//!     IdentityOperation::new(&["in_file"]),
//! )).unwrap();
//! graph.add_node(Node::declare(
//!     "realign",
//!     vec![InputPort::required("in_file", ValueType::File)],
//!     vec![OutputPort::new("in_file", ValueType::File)],
//!     IdentityOperation::new(&["in_file"]),
//! )).unwrap();
//!
//! graph.set_parameter("trim", "in_file", Value::Path("func.nii.gz".into())).unwrap();
//! graph.connect("trim", "in_file", "realign", "in_file").unwrap();
//!
//! assert!(graph.validate().is_ok());
//! assert_eq!(graph.topological_order().unwrap(), vec!["trim", "realign"]);
//! ```

mod connection;
mod node;
mod validation;
mod value;

pub use connection::{Connection, Transform};
pub use node::{InputPort, Iterable, Node, NodeKind, OutputPort};
pub use value::{Value, ValueType};

use std::collections::HashMap;

use crate::errors::{Binding, ConstructionError};

/// A directed acyclic graph of nodes wired by connections.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
}

impl Graph {
    /// Creates an empty graph. The name becomes the top-level working directory of a run.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            index: HashMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), ConstructionError> {
        if self.index.contains_key(node.name()) {
            return Err(ConstructionError::DuplicateNode {
                node: node.name().to_string(),
            });
        }
        self.index.insert(node.name().to_string(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Connects `source.source_output` to `dest.dest_input`.
    pub fn connect(
        &mut self,
        source: &str,
        source_output: &str,
        dest: &str,
        dest_input: &str,
    ) -> Result<(), ConstructionError> {
        self.add_connection(Connection {
            source: source.to_string(),
            source_output: source_output.to_string(),
            transform: None,
            dest: dest.to_string(),
            dest_input: dest_input.to_string(),
        })
    }

    /// Connects `source.source_output` to `dest.dest_input` through a transform.
    pub fn connect_with(
        &mut self,
        source: &str,
        source_output: &str,
        transform: Transform,
        dest: &str,
        dest_input: &str,
    ) -> Result<(), ConstructionError> {
        self.add_connection(Connection {
            source: source.to_string(),
            source_output: source_output.to_string(),
            transform: Some(transform),
            dest: dest.to_string(),
            dest_input: dest_input.to_string(),
        })
    }

    fn add_connection(&mut self, connection: Connection) -> Result<(), ConstructionError> {
        validation::check_connection(self, &connection)?;

        let existing = self.binding_of(&connection.dest, &connection.dest_input);
        if let Some(existing) = existing {
            return Err(ConstructionError::DestinationAlreadyBound {
                node: connection.dest.clone(),
                input: connection.dest_input.clone(),
                existing,
            });
        }

        self.connections.push(connection);
        Ok(())
    }

    /// Binds a static value to `node.input`.
    pub fn set_parameter(
        &mut self,
        node: &str,
        input: &str,
        value: impl Into<Value>,
    ) -> Result<(), ConstructionError> {
        self.ensure_not_connected(node, input)?;
        self.node_mut(node)?.set_parameter(input, value)
    }

    /// Marks `node.input` as an iterable axis over `values`.
    pub fn mark_iterable(
        &mut self,
        node: &str,
        input: &str,
        values: Vec<Value>,
    ) -> Result<(), ConstructionError> {
        self.ensure_not_connected(node, input)?;
        self.node_mut(node)?.mark_iterable(input, values)
    }

    fn ensure_not_connected(&self, node: &str, input: &str) -> Result<(), ConstructionError> {
        let target = self
            .node(node)
            .ok_or_else(|| ConstructionError::UnknownNode {
                node: node.to_string(),
            })?;
        if target.input(input).is_none() {
            return Err(ConstructionError::UnknownInput {
                node: node.to_string(),
                input: input.to_string(),
            });
        }
        if self.incoming(node, input).is_some() {
            return Err(ConstructionError::AlreadyBound {
                node: node.to_string(),
                input: input.to_string(),
                existing: Binding::Connection,
            });
        }
        Ok(())
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut Node, ConstructionError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(ConstructionError::UnknownNode {
                node: name.to_string(),
            }),
        }
    }

    /// How `node.input` is bound, if at all.
    pub fn binding_of(&self, node: &str, input: &str) -> Option<Binding> {
        if self.incoming(node, input).is_some() {
            return Some(Binding::Connection);
        }
        self.node(node).and_then(|n| n.local_binding(input))
    }

    /// The connection feeding `node.input`, if any.
    pub fn incoming(&self, node: &str, input: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.dest == node && c.dest_input == input)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Checks the whole graph, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<ConstructionError>> {
        validation::validate_graph(self)
    }

    /// Node names in dependency order; ties are broken by declaration order.
    pub fn topological_order(&self) -> Result<Vec<String>, ConstructionError> {
        validation::topological_order(self)
            .map(|order| order.into_iter().map(|i| self.nodes[i].name().to_string()).collect())
    }

    /// Downstream node indexes of every node, deduplicated, in connection order.
    pub(crate) fn successors(&self) -> Vec<Vec<usize>> {
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for connection in &self.connections {
            if let (Some(&from), Some(&to)) = (
                self.index.get(&connection.source),
                self.index.get(&connection.dest),
            ) {
                if !successors[from].contains(&to) {
                    successors[from].push(to);
                }
            }
        }
        successors
    }
}
