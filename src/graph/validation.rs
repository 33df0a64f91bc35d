// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structural validation of pipeline graphs.
//!
//! Validation runs in stages and accumulates errors so a pipeline author sees every problem
//! at once:
//!
//! 1. **Reference validation**: every connection names existing nodes and ports, and the
//!    delivered type is compatible with the destination port
//! 2. **Binding validation**: every required input is bound, no input is bound twice
//! 3. **Sink validation**: sinks are terminal
//! 4. **Cycle detection**: depth-first search reporting the actual cycle path
//!
//! Cycle detection needs a structurally sound graph, so it only runs when the reference
//! checks pass. Nothing here mutates the graph; validating twice gives the same answer.
//!
//! ## Cycle Detection Algorithm
//! Uses **DFS with a recursion stack** (the "three colors" approach):
//! - **White**: not yet explored
//! - **Gray**: on the current DFS path
//! - **Black**: fully explored
//!
//! Reaching a gray node closes a cycle; the path from that node to the current one, plus the
//! back edge, is the cycle. Nodes are visited in declaration order and neighbors in
//! connection order, so the reported cycle is deterministic.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::errors::{Binding, ConstructionError};
use crate::graph::{Connection, Graph};
use crate::observability::messages::validation::{CyclicDependencyDetected, ValidationStarted};
use crate::observability::messages::StructuredLog;

/// Checks that a connection's endpoints exist and that its types line up.
pub(super) fn check_connection(
    graph: &Graph,
    connection: &Connection,
) -> Result<(), ConstructionError> {
    let source = graph
        .node(&connection.source)
        .ok_or_else(|| ConstructionError::UnknownNode {
            node: connection.source.clone(),
        })?;
    let dest = graph
        .node(&connection.dest)
        .ok_or_else(|| ConstructionError::UnknownNode {
            node: connection.dest.clone(),
        })?;
    let output = source
        .output(&connection.source_output)
        .ok_or_else(|| ConstructionError::UnknownOutput {
            node: connection.source.clone(),
            output: connection.source_output.clone(),
        })?;
    let input = dest
        .input(&connection.dest_input)
        .ok_or_else(|| ConstructionError::UnknownInput {
            node: connection.dest.clone(),
            input: connection.dest_input.clone(),
        })?;

    let delivered = connection
        .transform
        .as_ref()
        .map(|t| t.output_type())
        .unwrap_or(output.value_type);
    if !delivered.is_compatible_with(input.value_type) {
        return Err(ConstructionError::TypeMismatch {
            node: connection.dest.clone(),
            input: connection.dest_input.clone(),
            expected: input.value_type,
            found: delivered,
        });
    }
    Ok(())
}

pub(super) fn validate_graph(graph: &Graph) -> Result<(), Vec<ConstructionError>> {
    ValidationStarted {
        graph: graph.name(),
        node_count: graph.nodes().len(),
        connection_count: graph.connections().len(),
    }
    .log();

    let mut errors = Vec::new();

    validate_references(graph, &mut errors);

    let references_ok = errors.is_empty();

    validate_bindings(graph, &mut errors);
    validate_sinks(graph, &mut errors);

    if references_ok {
        if let Some(cycle_path) = find_cycle(graph) {
            CyclicDependencyDetected {
                graph: graph.name(),
                cycle: &cycle_path,
            }
            .log();
            errors.push(ConstructionError::Cycle { cycle_path });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_references(graph: &Graph, errors: &mut Vec<ConstructionError>) {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for connection in graph.connections() {
        if let Err(e) = check_connection(graph, connection) {
            errors.push(e);
            continue;
        }
        if !seen.insert((connection.dest.as_str(), connection.dest_input.as_str())) {
            errors.push(ConstructionError::DestinationAlreadyBound {
                node: connection.dest.clone(),
                input: connection.dest_input.clone(),
                existing: Binding::Connection,
            });
        }
        let local = graph
            .node(&connection.dest)
            .and_then(|n| n.local_binding(&connection.dest_input));
        if let Some(existing) = local {
            errors.push(ConstructionError::DestinationAlreadyBound {
                node: connection.dest.clone(),
                input: connection.dest_input.clone(),
                existing,
            });
        }
    }
}

fn validate_bindings(graph: &Graph, errors: &mut Vec<ConstructionError>) {
    for node in graph.nodes() {
        for input in node.inputs().filter(|p| p.required) {
            if graph.binding_of(node.name(), &input.name).is_none() {
                errors.push(ConstructionError::UnboundInput {
                    node: node.name().to_string(),
                    input: input.name.clone(),
                });
            }
        }
    }
}

fn validate_sinks(graph: &Graph, errors: &mut Vec<ConstructionError>) {
    for node in graph.nodes().iter().filter(|n| n.is_sink()) {
        if graph.connections().iter().any(|c| c.source == node.name()) {
            errors.push(ConstructionError::SinkHasConsumers {
                node: node.name().to_string(),
            });
        }
    }
}

/// Returns the first cycle found, with its first node repeated at the end.
pub(super) fn find_cycle(graph: &Graph) -> Option<Vec<String>> {
    let successors = graph.successors();
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for start in 0..graph.nodes().len() {
        if !visited.contains(&start) {
            if let Some(cycle) = dfs_cycle_detection(
                start,
                &successors,
                &mut visited,
                &mut rec_stack,
                &mut path,
            ) {
                return Some(
                    cycle
                        .into_iter()
                        .map(|i| graph.nodes()[i].name().to_string())
                        .collect(),
                );
            }
        }
    }
    None
}

fn dfs_cycle_detection(
    node: usize,
    successors: &[Vec<usize>],
    visited: &mut HashSet<usize>,
    rec_stack: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    for &neighbor in &successors[node] {
        if !visited.contains(&neighbor) {
            if let Some(cycle) = dfs_cycle_detection(neighbor, successors, visited, rec_stack, path)
            {
                return Some(cycle);
            }
        } else if rec_stack.contains(&neighbor) {
            let cycle_start = path.iter().position(|&x| x == neighbor).unwrap_or(0);
            let mut cycle = path[cycle_start..].to_vec();
            cycle.push(neighbor);
            return Some(cycle);
        }
    }

    rec_stack.remove(&node);
    path.pop();
    None
}

/// Kahn's algorithm over node indexes, smallest declaration index first among ready nodes.
pub(super) fn topological_order(graph: &Graph) -> Result<Vec<usize>, ConstructionError> {
    let successors = graph.successors();
    let mut in_degree = vec![0usize; successors.len()];
    for targets in &successors {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(successors.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &successors[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != successors.len() {
        return Err(ConstructionError::Cycle {
            cycle_path: find_cycle(graph).unwrap_or_default(),
        });
    }
    Ok(order)
}
