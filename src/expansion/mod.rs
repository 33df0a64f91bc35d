// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Iterable expansion: turning a graph with fan-out axes into concrete node instances.
//!
//! Every node that marks an input iterable defines an **axis**. A node is replicated once
//! per combination of the values of the axes that reach it (its own axis, plus the axes of
//! its ancestors); nodes no axis reaches run once and are shared by every run instance.
//!
//! # Example
//!
//! `trim -> realign -> smooth`, with `smooth.fwhm` iterable over `[4, 6]`:
//!
//! ```text
//! trim                (shared)
//! realign             (shared)
//! _fwhm_4/smooth      run instance `_fwhm_4`
//! _fwhm_6/smooth      run instance `_fwhm_6`
//! ```
//!
//! # Rules
//!
//! - Axes are ordered by node declaration order; combinations are enumerated
//!   lexicographically over that order, values in declaration order.
//! - Two axes on one dependency chain (one axis node reachable from the other) are
//!   rejected with [`ExpansionError::IterableConflict`]. Only independent axes combine.
//! - A discriminator segment is `_<input>_<value>`, with `/` replaced by `..` and whitespace
//!   or `:` by `_`. Values of one axis mapping to the same segment are rejected.
//! - The same graph always expands to the same instance ids, order and directories.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::errors::{ConstructionError, ExpansionError};
use crate::graph::{Graph, Value};
use crate::observability::messages::expansion::{AxisConflictDetected, ExpansionCompleted};
use crate::observability::messages::StructuredLog;

/// One fan-out axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub node: String,
    pub input: String,
    pub values: Vec<Value>,
    /// Discriminator segment of every value, index-aligned with `values`.
    pub segments: Vec<String>,
}

/// Edge from an instance to the concrete upstream instance feeding one of its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEdge {
    /// Index into `Graph::connections()`.
    pub connection: usize,
    /// Index into `ExpansionPlan::instances`.
    pub instance: usize,
}

/// One concrete copy of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInstance {
    /// Position in `ExpansionPlan::instances`.
    pub index: usize,
    /// Stable id, equal to the working directory relative to the graph directory.
    pub id: String,
    pub node: String,
    pub node_index: usize,
    /// Segments of the axes reaching this node joined by `/`; empty for shared instances.
    pub discriminator: String,
    /// Static parameters plus this instance's iterable value.
    pub parameters: BTreeMap<String, Value>,
    pub upstream: Vec<UpstreamEdge>,
    /// Depth in the graph: 0 for nodes without upstream connections.
    pub rank: usize,
    /// Run instances this instance participates in.
    pub run_instances: Vec<usize>,
}

impl NodeInstance {
    pub fn working_directory(&self, graph_root: &Path) -> PathBuf {
        graph_root.join(&self.id)
    }
}

/// One fully concrete expansion of the graph for one combination of axis values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstance {
    pub discriminator: String,
    /// Indexes into `ExpansionPlan::instances`, ascending.
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionPlan {
    pub graph: String,
    pub axes: Vec<Axis>,
    /// Instances in topological order, combinations in lexicographic order.
    pub instances: Vec<NodeInstance>,
    pub run_instances: Vec<RunInstance>,
}

impl ExpansionPlan {
    pub fn instance(&self, id: &str) -> Option<&NodeInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// Instance indexes that consume the given instance, directly.
    pub fn downstream(&self) -> Vec<Vec<usize>> {
        let mut downstream = vec![Vec::new(); self.instances.len()];
        for instance in &self.instances {
            for edge in &instance.upstream {
                if !downstream[edge.instance].contains(&instance.index) {
                    downstream[edge.instance].push(instance.index);
                }
            }
        }
        downstream
    }
}

/// Per-node facts needed while laying out instances.
struct NodeLayout {
    axes: Vec<usize>,
    first_instance: usize,
}

impl NodeLayout {
    /// Instance index for a full assignment (value index per axis) restricted to this node.
    fn instance_for(&self, assignment: &[usize], axes: &[Axis]) -> usize {
        let offset = self
            .axes
            .iter()
            .fold(0, |acc, &a| acc * axes[a].values.len() + assignment[a]);
        self.first_instance + offset
    }
}

/// Expands `graph` into node instances and run instances.
///
/// The graph is expected to have passed [`Graph::validate`]; a cycle is reported as
/// [`ExpansionError::Cyclic`].
pub fn expand(graph: &Graph) -> Result<ExpansionPlan, ExpansionError> {
    let order: Vec<usize> = graph
        .topological_order()
        .map_err(|e| ExpansionError::Cyclic {
            cycle_path: match e {
                ConstructionError::Cycle { cycle_path } => cycle_path,
                _ => Vec::new(),
            },
        })?
        .iter()
        .filter_map(|name| graph.index_of(name))
        .collect();

    let node_count = graph.nodes().len();
    let successors = graph.successors();
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for (from, targets) in successors.iter().enumerate() {
        for &to in targets {
            predecessors[to].push(from);
        }
    }

    let mut ancestors: Vec<HashSet<usize>> = vec![HashSet::new(); node_count];
    let mut depth = vec![0usize; node_count];
    for &n in &order {
        let mut set = HashSet::new();
        for &p in &predecessors[n] {
            set.insert(p);
            set.extend(ancestors[p].iter().copied());
            depth[n] = depth[n].max(depth[p] + 1);
        }
        ancestors[n] = set;
    }

    let axis_nodes: Vec<usize> = (0..node_count)
        .filter(|&n| graph.nodes()[n].iterable().is_some())
        .collect();
    let axes = build_axes(graph, &axis_nodes)?;
    check_independence(graph, &axis_nodes, &axes, &ancestors)?;

    let mut layouts: Vec<Option<NodeLayout>> = (0..node_count).map(|_| None).collect();
    let mut instances: Vec<NodeInstance> = Vec::new();

    for &n in &order {
        let node = &graph.nodes()[n];
        let node_axes: Vec<usize> = axis_nodes
            .iter()
            .enumerate()
            .filter(|&(_, &axis_node)| axis_node == n || ancestors[n].contains(&axis_node))
            .map(|(a, _)| a)
            .collect();
        let layout = NodeLayout {
            axes: node_axes,
            first_instance: instances.len(),
        };

        for combination in combinations(&layout.axes, &axes) {
            let mut assignment = vec![0usize; axes.len()];
            for (&a, &v) in layout.axes.iter().zip(&combination) {
                assignment[a] = v;
            }

            let segments: Vec<&str> = layout
                .axes
                .iter()
                .map(|&a| axes[a].segments[assignment[a]].as_str())
                .collect();
            let discriminator = segments.join("/");
            let id = if discriminator.is_empty() {
                node.name().to_string()
            } else {
                format!("{}/{}", discriminator, node.name())
            };

            let mut parameters = node.parameters().clone();
            if let Some(iterable) = node.iterable() {
                if let Some(a) = axis_nodes.iter().position(|&axis_node| axis_node == n) {
                    parameters.insert(iterable.input.clone(), axes[a].values[assignment[a]].clone());
                }
            }

            let mut upstream = Vec::new();
            for (ci, connection) in graph.connections().iter().enumerate() {
                if connection.dest != node.name() {
                    continue;
                }
                let source = graph.index_of(&connection.source);
                if let Some(source_layout) = source.and_then(|s| layouts[s].as_ref()) {
                    upstream.push(UpstreamEdge {
                        connection: ci,
                        instance: source_layout.instance_for(&assignment, &axes),
                    });
                }
            }

            instances.push(NodeInstance {
                index: instances.len(),
                id,
                node: node.name().to_string(),
                node_index: n,
                discriminator,
                parameters,
                upstream,
                rank: depth[n],
                run_instances: Vec::new(),
            });
        }
        layouts[n] = Some(layout);
    }

    let all_axes: Vec<usize> = (0..axes.len()).collect();
    let mut run_instances = Vec::new();
    for combination in combinations(&all_axes, &axes) {
        let run_index = run_instances.len();
        let discriminator = combination
            .iter()
            .enumerate()
            .map(|(a, &v)| axes[a].segments[v].as_str())
            .collect::<Vec<_>>()
            .join("/");

        let mut members: Vec<usize> = layouts
            .iter()
            .flatten()
            .map(|layout| layout.instance_for(&combination, &axes))
            .collect();
        members.sort_unstable();
        for &m in &members {
            instances[m].run_instances.push(run_index);
        }
        run_instances.push(RunInstance {
            discriminator,
            members,
        });
    }

    let plan = ExpansionPlan {
        graph: graph.name().to_string(),
        axes,
        instances,
        run_instances,
    };

    ExpansionCompleted {
        graph: &plan.graph,
        axis_count: plan.axes.len(),
        instance_count: plan.instances.len(),
        run_instance_count: plan.run_instances.len(),
    }
    .log();

    Ok(plan)
}

fn build_axes(graph: &Graph, axis_nodes: &[usize]) -> Result<Vec<Axis>, ExpansionError> {
    let mut axes = Vec::with_capacity(axis_nodes.len());
    for &n in axis_nodes {
        let node = &graph.nodes()[n];
        let Some(iterable) = node.iterable() else {
            continue;
        };

        let mut seen = HashSet::new();
        let mut segments = Vec::with_capacity(iterable.values.len());
        for value in &iterable.values {
            let segment = discriminator_segment(&iterable.input, value);
            if !seen.insert(segment.clone()) {
                return Err(ExpansionError::DiscriminatorCollision {
                    node: node.name().to_string(),
                    input: iterable.input.clone(),
                    segment,
                });
            }
            segments.push(segment);
        }

        axes.push(Axis {
            node: node.name().to_string(),
            input: iterable.input.clone(),
            values: iterable.values.clone(),
            segments,
        });
    }
    Ok(axes)
}

fn check_independence(
    graph: &Graph,
    axis_nodes: &[usize],
    axes: &[Axis],
    ancestors: &[HashSet<usize>],
) -> Result<(), ExpansionError> {
    for (i, &first) in axis_nodes.iter().enumerate() {
        for (j, &second) in axis_nodes.iter().enumerate().skip(i + 1) {
            let (upstream, downstream) = if ancestors[second].contains(&first) {
                (i, j)
            } else if ancestors[first].contains(&second) {
                (j, i)
            } else {
                continue;
            };

            let err = ExpansionError::IterableConflict {
                upstream_node: axes[upstream].node.clone(),
                upstream_input: axes[upstream].input.clone(),
                downstream_node: axes[downstream].node.clone(),
                downstream_input: axes[downstream].input.clone(),
            };
            AxisConflictDetected {
                graph: graph.name(),
                error: &err,
            }
            .log();
            return Err(err);
        }
    }
    Ok(())
}

/// `_<input>_<value>`, made safe to use as a single path component.
pub fn discriminator_segment(input: &str, value: &Value) -> String {
    let raw = format!("_{}_{}", input, value);
    let mut segment = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '/' => segment.push_str(".."),
            ':' => segment.push('_'),
            c if c.is_whitespace() => segment.push('_'),
            c => segment.push(c),
        }
    }
    segment
}

/// Every combination of value indexes over `selected` axes, lexicographically.
fn combinations(selected: &[usize], axes: &[Axis]) -> Vec<Vec<usize>> {
    let mut result = vec![Vec::with_capacity(selected.len())];
    for &a in selected {
        let count = axes[a].values.len();
        result = result
            .into_iter()
            .flat_map(|prefix| {
                (0..count).map(move |v| {
                    let mut next = prefix.clone();
                    next.push(v);
                    next
                })
            })
            .collect();
    }
    result
}
