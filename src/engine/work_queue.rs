// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Work queue executor with dependency counting, result caching and bounded parallelism.
//!
//! # Architecture Overview
//!
//! The executor runs the instances of an [`ExpansionPlan`] using a **priority queue** combined
//! with **dependency counting**:
//! - Every instance counts the distinct upstream instances it is still waiting for
//! - Instances whose count reaches zero enter the ready queue, ordered by topological rank
//!   and then by expansion order
//! - At most `max_workers` instances execute at once, each on its own tokio task in a
//!   `JoinSet`
//! - The scheduling loop owns the queue and the counters; only the node-state table and the
//!   cache index are shared with workers
//!
//! # Execution Flow
//!
//! 1. **Validation**: the graph must be fully bound and acyclic
//! 2. **Expansion**: iterable axes are multiplied out into node instances
//! 3. **Initialization**: dependency counts are built and instances without upstream
//!    dependencies are queued
//! 4. **Execution Loop**: workers are started until the pool is full, then the loop waits
//!    for a worker to finish (or for cancellation) and releases its dependents
//! 5. **Report**: every instance's final state, outputs and timings are collected
//!
//! # Per-instance work
//!
//! ```text
//! cache key ──> lookup ──hit──> Completed { cached: true }
//!                  │
//!                  └─miss/stale──> reset working dir ──> invoke (timeout, retries) ──> record
//! ```
//!
//! A failure marks the instance `Failed` and every pending descendant `Blocked`. Under
//! [`FailureStrategy::ContinueOnError`] unrelated branches keep running; under
//! [`FailureStrategy::FailFast`] nothing new is scheduled and unscheduled instances end
//! `Cancelled`.
//!
//! # Examples
//!
//! ```rust
//! use preflow::backends::IdentityOperation;
//! use preflow::engine::WorkQueueExecutor;
//! use preflow::graph::{Graph, InputPort, Node, OutputPort, ValueType};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let work = tempfile::tempdir()?;
//! let mut graph = Graph::new("sub-01");
//! graph.add_node(Node::declare(
//!     "subject",
//!     vec![InputPort::required("subject_id", ValueType::Scalar)],
//!     vec![OutputPort::new("subject_id", ValueType::Scalar)],
//!     IdentityOperation::new(&["subject_id"]),
//! ))?;
//! graph.mark_iterable("subject", "subject_id", vec!["01".into(), "02".into()])?;
//!
//! let executor = WorkQueueExecutor::new(work.path()).with_max_workers(2);
//! let report = executor.run(&graph).await?;
//! assert!(report.is_success());
//! assert_eq!(report.run_instances.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::config::{CacheOptions, CorruptionPolicy, EngineConfig, ExecutorOptions, RetryPolicy, ToolConfig};
use crate::engine::cache::{compute_cache_key, CacheIndex, CacheKeyMaterial, CacheLookup, NodeRecord};
use crate::engine::control::RunControl;
use crate::engine::priority_work_queue::{PrioritizedTask, PriorityWorkQueue};
use crate::engine::report::{NodeReport, RunInstanceReport, RunReport};
use crate::engine::state::{NodeState, RunStatus};
use crate::errors::{CacheCorruptionError, ExecutionError, FailureStrategy, NodeFailure, RunError};
use crate::expansion::{expand, ExpansionPlan};
use crate::graph::{Graph, Value, ValueType};
use crate::observability::messages::engine::{
    CancellationRequested, ExecutionCompleted, ExecutionFailed, ExecutionStarted,
};
use crate::observability::messages::node::{
    NodeBlocked, NodeCacheHit, NodeCancelled, NodeCompleted, NodeFailed, NodeRetrying,
    NodeStarted, StaleCacheRemoved,
};
use crate::observability::messages::validation::ValidationFailed;
use crate::observability::messages::StructuredLog;
use crate::traits::{Invocation, Invoked, Operation};

/// Executes graphs with a bounded pool of workers.
///
/// One executor owns one [`ToolConfig`] and one cache index; it can run any number of
/// graphs, one after the other or concurrently.
pub struct WorkQueueExecutor {
    base_dir: PathBuf,
    max_workers: usize,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    failure_strategy: FailureStrategy,
    cache: CacheOptions,
    tools: Arc<ToolConfig>,
    cache_index: Arc<CacheIndex>,
}

impl WorkQueueExecutor {
    /// Executor with default options writing working directories below `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_workers: ExecutorOptions::default().max_workers(),
            timeout: None,
            retry: RetryPolicy::default(),
            failure_strategy: FailureStrategy::default(),
            cache: CacheOptions::default(),
            tools: Arc::new(ToolConfig::default()),
            cache_index: Arc::new(CacheIndex::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            max_workers: config.executor.max_workers(),
            timeout: config.executor.timeout(),
            retry: config.executor.retry.clone(),
            failure_strategy: config.executor.failure_strategy,
            cache: config.cache.clone(),
            tools: Arc::new(config.tools.clone()),
            cache_index: Arc::new(CacheIndex::new()),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Default wall-clock limit per invocation; nodes may override it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Default retry policy; nodes may override it.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    pub fn with_cache_options(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_tools(mut self, tools: ToolConfig) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Directory holding the working directories of every instance of `graph`.
    pub fn graph_root(&self, graph: &Graph) -> PathBuf {
        self.base_dir.join(graph.name())
    }

    pub async fn run(&self, graph: &Graph) -> Result<RunReport, RunError> {
        self.run_with_control(graph, RunControl::new()).await
    }

    /// Runs `graph` until every instance reached a final state or `control` cancels the run.
    ///
    /// Node failures do not make this return `Err`; they are recorded in the report. Use
    /// [`RunReport::into_result`] to treat them as an error.
    pub async fn run_with_control(
        &self,
        graph: &Graph,
        control: RunControl,
    ) -> Result<RunReport, RunError> {
        let start = Instant::now();

        if let Err(errors) = graph.validate() {
            ValidationFailed {
                graph: graph.name(),
                error_count: errors.len(),
            }
            .log();
            return Err(RunError::Construction(errors));
        }

        let plan = expand(graph).map_err(|e| {
            ExecutionFailed {
                graph: graph.name(),
                error: &e,
            }
            .log();
            RunError::Expansion(e)
        })?;

        let graph_root = self.graph_root(graph);
        tokio::fs::create_dir_all(&graph_root)
            .await
            .map_err(|source| RunError::Io {
                path: graph_root.clone(),
                source,
            })?;

        ExecutionStarted {
            graph: graph.name(),
            instance_count: plan.instances.len(),
            run_instance_count: plan.run_instances.len(),
            max_workers: self.max_workers,
        }
        .log();

        let mut scheduler = Scheduler::new(graph, &plan, graph_root, self.failure_strategy);
        let context = Arc::new(WorkerContext {
            graph: graph.name().to_string(),
            cache: self.cache.clone(),
            cache_index: Arc::clone(&self.cache_index),
            tools: Arc::clone(&self.tools),
            states: Arc::clone(&scheduler.states),
            invocations: AtomicUsize::new(0),
            token: control.token().clone(),
        });

        let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();
        let mut spawned: HashMap<Id, usize> = HashMap::new();
        loop {
            if !scheduler.stop && control.is_cancelled() {
                scheduler.stop = true;
                CancellationRequested {
                    graph: graph.name(),
                    run_instances: &[],
                }
                .log();
            }

            if !scheduler.stop {
                while join_set.len() < self.max_workers {
                    let Some(index) = scheduler.queue.pop() else {
                        break;
                    };

                    let instance = &plan.instances[index];
                    let discriminators = instance
                        .run_instances
                        .iter()
                        .map(|&r| plan.run_instances[r].discriminator.as_str());
                    if control.covers_all(discriminators).await {
                        CancellationRequested {
                            graph: graph.name(),
                            run_instances: &control.cancelled_instances().await,
                        }
                        .log();
                        scheduler.cancel(index).await;
                        continue;
                    }

                    match scheduler.prepare(index, self) {
                        Ok(job) => {
                            let handle = join_set.spawn(execute(Arc::clone(&context), job));
                            spawned.insert(handle.id(), index);
                        }
                        Err(failure) => {
                            NodeFailed {
                                instance: &instance.id,
                                error: &failure,
                            }
                            .log();
                            scheduler.settle(NodeOutcome::failed(index, failure)).await;
                        }
                    }
                }
            }

            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok(outcome)) => scheduler.settle(outcome).await,
                    Some(Err(e)) => match spawned.remove(&e.id()) {
                        Some(index) => {
                            let failure = NodeFailure::Internal {
                                node: plan.instances[index].id.clone(),
                                message: format!("worker task failed: {}", e),
                            };
                            NodeFailed {
                                instance: &plan.instances[index].id,
                                error: &failure,
                            }
                            .log();
                            scheduler.settle(NodeOutcome::failed(index, failure)).await;
                        }
                        None => ExecutionFailed {
                            graph: graph.name(),
                            error: &e,
                        }
                        .log(),
                    },
                    None => {}
                },
                _ = control.token().cancelled(), if !scheduler.stop => {
                    scheduler.stop = true;
                    CancellationRequested {
                        graph: graph.name(),
                        run_instances: &[],
                    }
                    .log();
                }
            }
        }

        let report = scheduler
            .finish(context.invocations.load(Ordering::SeqCst), start.elapsed())
            .await;

        ExecutionCompleted {
            graph: graph.name(),
            status: &report.status.to_string(),
            instance_count: report.nodes.len(),
            invocations: report.invocations,
            duration: report.duration,
        }
        .log();

        Ok(report)
    }
}

/// What the scheduling loop remembers about a settled instance.
#[derive(Debug, Default)]
struct InstanceResult {
    outputs: BTreeMap<String, Value>,
    attempts: u32,
    duration: Duration,
    cache_key: Option<String>,
}

/// State owned by the scheduling loop of one run.
struct Scheduler<'a> {
    graph: &'a Graph,
    plan: &'a ExpansionPlan,
    graph_root: PathBuf,
    failure_strategy: FailureStrategy,
    downstream: Vec<Vec<usize>>,
    /// Distinct upstream instances each instance is still waiting for.
    dependency_counts: Vec<usize>,
    queue: PriorityWorkQueue,
    states: Arc<Mutex<Vec<NodeState>>>,
    results: Vec<InstanceResult>,
    /// Set once nothing new may be scheduled.
    stop: bool,
}

impl<'a> Scheduler<'a> {
    fn new(
        graph: &'a Graph,
        plan: &'a ExpansionPlan,
        graph_root: PathBuf,
        failure_strategy: FailureStrategy,
    ) -> Self {
        let count = plan.instances.len();
        let mut dependency_counts = vec![0usize; count];
        let mut states = vec![NodeState::Pending; count];
        let mut roots = Vec::new();

        for instance in &plan.instances {
            let distinct: HashSet<usize> = instance.upstream.iter().map(|e| e.instance).collect();
            dependency_counts[instance.index] = distinct.len();
            if distinct.is_empty() {
                states[instance.index] = NodeState::Ready;
                roots.push(PrioritizedTask::new(
                    instance.index,
                    instance.rank,
                    instance.index,
                ));
            }
        }

        let mut queue = PriorityWorkQueue::new();
        queue.extend(roots);

        Self {
            graph,
            plan,
            graph_root,
            failure_strategy,
            downstream: plan.downstream(),
            dependency_counts,
            queue,
            states: Arc::new(Mutex::new(states)),
            results: (0..count).map(|_| InstanceResult::default()).collect(),
            stop: false,
        }
    }

    /// Resolves the inputs of a ready instance and packages everything a worker needs.
    fn prepare(&self, index: usize, executor: &WorkQueueExecutor) -> Result<NodeJob, NodeFailure> {
        let instance = &self.plan.instances[index];
        let node = &self.graph.nodes()[instance.node_index];
        let resolution_failure = |message: String| NodeFailure::InputResolution {
            node: instance.id.clone(),
            message,
        };

        let mut inputs = instance.parameters.clone();
        let mut upstream_keys = BTreeMap::new();
        for edge in &instance.upstream {
            let connection = &self.graph.connections()[edge.connection];
            let source = &self.plan.instances[edge.instance];
            let result = &self.results[edge.instance];

            let produced = result.outputs.get(&connection.source_output).ok_or_else(|| {
                resolution_failure(format!(
                    "'{}' did not produce output '{}'",
                    source.id, connection.source_output
                ))
            })?;
            let mut value = connection.deliver(produced).map_err(&resolution_failure)?;
            if let Some(port) = node.input(&connection.dest_input) {
                if !value.conforms_to(port.value_type) {
                    return Err(resolution_failure(format!(
                        "input '{}' expects a {} value, received {}",
                        connection.dest_input, port.value_type, value
                    )));
                }
                value = value.bound_to(port.value_type);
            }

            inputs.insert(connection.dest_input.clone(), value);
            upstream_keys.insert(source.id.clone(), result.cache_key.clone().unwrap_or_default());
        }

        Ok(NodeJob {
            index,
            instance: instance.id.clone(),
            node: node.name().to_string(),
            discriminator: instance.discriminator.clone(),
            operation: node.operation(),
            inputs,
            upstream_keys,
            working_directory: instance.working_directory(&self.graph_root),
            outputs: node
                .outputs()
                .map(|port| (port.name.clone(), port.value_type))
                .collect(),
            timeout: node.timeout().or(executor.timeout),
            retry: node.retry().cloned().unwrap_or_else(|| executor.retry.clone()),
        })
    }

    /// Records the outcome of an instance and releases or blocks its dependents.
    async fn settle(&mut self, outcome: NodeOutcome) {
        let index = outcome.index;
        self.results[index] = InstanceResult {
            outputs: outcome.outputs,
            attempts: outcome.attempts,
            duration: outcome.duration,
            cache_key: outcome.cache_key,
        };

        let completed = outcome.state.is_completed();
        let failed = matches!(outcome.state, NodeState::Failed(_));
        self.states.lock().await[index] = outcome.state;

        if completed {
            self.release_dependents(index).await;
        } else if failed {
            if self.failure_strategy == FailureStrategy::FailFast {
                self.stop = true;
            }
            self.block_descendants(index).await;
        }
    }

    async fn release_dependents(&mut self, index: usize) {
        let mut states = self.states.lock().await;
        for &dependent in &self.downstream[index] {
            self.dependency_counts[dependent] = self.dependency_counts[dependent].saturating_sub(1);
            if self.dependency_counts[dependent] == 0 && states[dependent] == NodeState::Pending {
                states[dependent] = NodeState::Ready;
                let instance = &self.plan.instances[dependent];
                self.queue
                    .push(PrioritizedTask::new(dependent, instance.rank, dependent));
            }
        }
    }

    async fn block_descendants(&mut self, origin: usize) {
        let origin_id = &self.plan.instances[origin].id;
        let mut states = self.states.lock().await;
        let mut visited = HashSet::new();
        let mut stack = self.downstream[origin].clone();

        while let Some(descendant) = stack.pop() {
            if !visited.insert(descendant) {
                continue;
            }
            if states[descendant] == NodeState::Pending {
                states[descendant] = NodeState::Blocked {
                    origin: origin_id.clone(),
                };
                NodeBlocked {
                    instance: &self.plan.instances[descendant].id,
                    origin: origin_id,
                }
                .log();
            }
            stack.extend(self.downstream[descendant].iter().copied());
        }
    }

    async fn cancel(&mut self, index: usize) {
        self.states.lock().await[index] = NodeState::Cancelled;
        NodeCancelled {
            instance: &self.plan.instances[index].id,
        }
        .log();
    }

    /// Settles whatever never ran and builds the report.
    async fn finish(mut self, invocations: usize, duration: Duration) -> RunReport {
        for index in self.queue.drain() {
            self.cancel(index).await;
        }

        let mut states = self.states.lock().await;
        for (index, state) in states.iter_mut().enumerate() {
            if state.is_terminal() {
                continue;
            }
            let instance = &self.plan.instances[index];
            match state {
                NodeState::Pending | NodeState::Ready => {
                    *state = NodeState::Cancelled;
                    NodeCancelled {
                        instance: &instance.id,
                    }
                    .log();
                }
                NodeState::Running => {
                    *state = NodeState::Failed(NodeFailure::Internal {
                        node: instance.id.clone(),
                        message: "worker ended without reporting a result".to_string(),
                    });
                }
                _ => {}
            }
        }

        let nodes: Vec<NodeReport> = self
            .plan
            .instances
            .iter()
            .zip(self.results.iter_mut())
            .map(|(instance, result)| NodeReport {
                instance: instance.id.clone(),
                node: instance.node.clone(),
                discriminator: instance.discriminator.clone(),
                state: states[instance.index].clone(),
                working_directory: instance.working_directory(&self.graph_root),
                outputs: std::mem::take(&mut result.outputs),
                attempts: result.attempts,
                duration: result.duration,
                cache_key: result.cache_key.take(),
            })
            .collect();

        let run_instances = self
            .plan
            .run_instances
            .iter()
            .map(|run| RunInstanceReport {
                discriminator: run.discriminator.clone(),
                status: RunStatus::from_states(run.members.iter().map(|&m| &states[m])),
                members: run
                    .members
                    .iter()
                    .map(|&m| self.plan.instances[m].id.clone())
                    .collect(),
            })
            .collect();

        RunReport {
            graph: self.graph.name().to_string(),
            status: RunStatus::from_states(states.iter()),
            nodes,
            run_instances,
            invocations,
            duration,
        }
    }
}

/// Shared, read-mostly state handed to every worker of one run.
struct WorkerContext {
    graph: String,
    cache: CacheOptions,
    cache_index: Arc<CacheIndex>,
    tools: Arc<ToolConfig>,
    states: Arc<Mutex<Vec<NodeState>>>,
    invocations: AtomicUsize,
    token: CancellationToken,
}

/// Everything a worker needs to execute one instance.
struct NodeJob {
    index: usize,
    instance: String,
    node: String,
    discriminator: String,
    operation: Arc<dyn Operation>,
    inputs: BTreeMap<String, Value>,
    upstream_keys: BTreeMap<String, String>,
    working_directory: PathBuf,
    outputs: Vec<(String, ValueType)>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl NodeJob {
    fn internal(&self, message: String) -> NodeFailure {
        NodeFailure::Internal {
            node: self.instance.clone(),
            message,
        }
    }

    fn execution_error(
        &self,
        message: String,
        exit_status: Option<i32>,
        partial_outputs: BTreeMap<String, Value>,
    ) -> NodeFailure {
        NodeFailure::Execution(ExecutionError {
            node: self.instance.clone(),
            message,
            exit_status,
            partial_outputs,
        })
    }

    fn failed(&self, failure: NodeFailure) -> NodeState {
        NodeFailed {
            instance: &self.instance,
            error: &failure,
        }
        .log();
        NodeState::Failed(failure)
    }

    /// Checks a finished invocation against the declared outputs.
    fn check_outputs(&self, invoked: Invoked) -> Attempt {
        if invoked.exit_status != 0 {
            return Attempt::Failed(self.execution_error(
                format!("operation exited with status {}", invoked.exit_status),
                Some(invoked.exit_status),
                invoked.outputs,
            ));
        }

        let mut outputs = invoked.outputs;
        let mut problems = Vec::new();
        for (name, value_type) in &self.outputs {
            match outputs.get_mut(name) {
                None => problems.push(format!("'{}' is missing", name)),
                Some(value) if !value.conforms_to(*value_type) => {
                    problems.push(format!("'{}' is not a {} value", name, value_type))
                }
                Some(value) => *value = value.clone().bound_to(*value_type),
            }
        }

        if problems.is_empty() {
            Attempt::Succeeded(outputs)
        } else {
            Attempt::Failed(self.execution_error(
                format!("declared outputs not produced: {}", problems.join(", ")),
                None,
                outputs,
            ))
        }
    }
}

/// Result of a worker.
struct NodeOutcome {
    index: usize,
    state: NodeState,
    outputs: BTreeMap<String, Value>,
    attempts: u32,
    duration: Duration,
    cache_key: Option<String>,
}

impl NodeOutcome {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: NodeState::Running,
            outputs: BTreeMap::new(),
            attempts: 0,
            duration: Duration::ZERO,
            cache_key: None,
        }
    }

    fn failed(index: usize, failure: NodeFailure) -> Self {
        Self {
            state: NodeState::Failed(failure),
            ..Self::new(index)
        }
    }
}

enum Attempt {
    Succeeded(BTreeMap<String, Value>),
    Failed(NodeFailure),
    Cancelled,
}

/// Aborts the invocation task when the worker stops waiting for it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn execute(context: Arc<WorkerContext>, job: NodeJob) -> NodeOutcome {
    let start = Instant::now();
    let span = NodeStarted {
        instance: &job.instance,
        operation: job.operation.name(),
        attempt: 1,
        max_attempts: job.retry.max_attempts.max(1),
    }
    .span("node_execution");

    let mut outcome = NodeOutcome::new(job.index);
    outcome.state = run_node(&context, &job, &mut outcome).instrument(span).await;
    outcome.duration = start.elapsed();
    outcome
}

async fn run_node(context: &WorkerContext, job: &NodeJob, outcome: &mut NodeOutcome) -> NodeState {
    let material = CacheKeyMaterial {
        graph: context.graph.clone(),
        instance: job.instance.clone(),
        node: job.node.clone(),
        operation: job.operation.fingerprint(),
        inputs: job.inputs.clone(),
        upstream: job.upstream_keys.clone(),
    };
    let method = context.cache.hash_method;
    let cache_key =
        match tokio::task::spawn_blocking(move || compute_cache_key(&material, method)).await {
            Ok(Ok(key)) => key,
            Ok(Err(e)) => return job.failed(job.internal(format!("failed to fingerprint inputs: {}", e))),
            Err(e) => return job.failed(job.internal(format!("fingerprinting task failed: {}", e))),
        };
    outcome.cache_key = Some(cache_key.clone());

    let working_directory = &job.working_directory;
    if !context.cache.force_rerun {
        match context.cache_index.lookup(working_directory, &cache_key).await {
            Ok(CacheLookup::Hit(record)) => {
                NodeCacheHit {
                    instance: &job.instance,
                    cache_key: &cache_key,
                }
                .log();
                outcome.outputs = record.outputs;
                return NodeState::Completed { cached: true };
            }
            Ok(CacheLookup::Corrupt { missing }) => {
                if context.cache.on_corruption == CorruptionPolicy::Fail {
                    return job.failed(NodeFailure::CacheCorruption(CacheCorruptionError {
                        instance: job.instance.clone(),
                        working_directory: working_directory.clone(),
                        missing,
                    }));
                }
            }
            Ok(CacheLookup::Stale) | Ok(CacheLookup::Miss) => {}
            Err(e) => return job.failed(job.internal(format!("failed to read node record: {}", e))),
        }
    }

    context.cache_index.forget(working_directory).await;
    context.states.lock().await[job.index] = NodeState::Running;

    let max_attempts = job.retry.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let delay = job.retry.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = context.token.cancelled() => return cancelled(job),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // every attempt starts from an empty directory
        match reset_working_directory(working_directory).await {
            Ok(true) if attempt == 1 => StaleCacheRemoved {
                instance: &job.instance,
                working_directory,
            }
            .log(),
            Ok(_) => {}
            Err(e) => {
                return job.failed(job.internal(format!(
                    "failed to prepare {}: {}",
                    working_directory.display(),
                    e
                )))
            }
        }

        NodeStarted {
            instance: &job.instance,
            operation: job.operation.name(),
            attempt,
            max_attempts,
        }
        .log();
        context.invocations.fetch_add(1, Ordering::SeqCst);
        outcome.attempts = attempt;
        let invoked_at = Instant::now();

        let failure = match invoke_once(context, job).await {
            Attempt::Succeeded(outputs) => {
                let record = NodeRecord {
                    cache_key: cache_key.clone(),
                    node: job.node.clone(),
                    instance: job.instance.clone(),
                    outputs: outputs.clone(),
                };
                if let Err(e) = context.cache_index.store(working_directory, record).await {
                    return job.failed(job.internal(format!("failed to write node record: {}", e)));
                }
                NodeCompleted {
                    instance: &job.instance,
                    output_count: outputs.len(),
                    duration: invoked_at.elapsed(),
                }
                .log();
                outcome.outputs = outputs;
                return NodeState::Completed { cached: false };
            }
            Attempt::Failed(failure) => failure,
            Attempt::Cancelled => return cancelled(job),
        };

        if let NodeFailure::Execution(error) = &failure {
            outcome.outputs = error.partial_outputs.clone();
        }
        if attempt >= max_attempts {
            return job.failed(failure);
        }

        NodeRetrying {
            instance: &job.instance,
            attempt,
            max_attempts,
            delay: job.retry.delay_before(attempt + 1),
            error: &failure,
        }
        .log();
    }
}

fn cancelled(job: &NodeJob) -> NodeState {
    NodeCancelled {
        instance: &job.instance,
    }
    .log();
    NodeState::Cancelled
}

/// Runs the operation once on its own task, bounded by the timeout and the cancellation
/// token. Leaving early aborts the task, which drops (and kills) any child process.
async fn invoke_once(context: &WorkerContext, job: &NodeJob) -> Attempt {
    let invocation = Invocation {
        node: job.node.clone(),
        instance: job.instance.clone(),
        discriminator: job.discriminator.clone(),
        parameters: job.inputs.clone(),
        working_directory: job.working_directory.clone(),
        tools: Arc::clone(&context.tools),
    };
    let operation = Arc::clone(&job.operation);
    let handle = tokio::spawn(
        async move { operation.invoke(&invocation).await }.instrument(Span::current()),
    );
    let _abort = AbortOnDrop(handle.abort_handle());

    let joined = tokio::select! {
        biased;
        _ = context.token.cancelled() => return Attempt::Cancelled,
        joined = within(job.timeout, handle) => joined,
    };

    match joined {
        None => Attempt::Failed(NodeFailure::Timeout {
            node: job.instance.clone(),
            limit: job.timeout.unwrap_or_default(),
        }),
        Some(Err(e)) => Attempt::Failed(job.internal(format!(
            "operation '{}' did not complete: {}",
            job.operation.name(),
            e
        ))),
        Some(Ok(Err(error))) => Attempt::Failed(job.execution_error(
            error.message,
            error.exit_status,
            error.partial_outputs,
        )),
        Some(Ok(Ok(invoked))) => job.check_outputs(invoked),
    }
}

/// `None` if `limit` elapsed first.
async fn within<T>(limit: Option<Duration>, handle: JoinHandle<T>) -> Option<Result<T, JoinError>> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, handle).await.ok(),
        None => Some(handle.await),
    }
}

/// Clears whatever an earlier run or attempt left in the working directory and recreates
/// it. Returns whether anything was removed.
async fn reset_working_directory(working_directory: &Path) -> std::io::Result<bool> {
    let existed = match tokio::fs::metadata(working_directory).await {
        Ok(_) => {
            tokio::fs::remove_dir_all(working_directory).await?;
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    tokio::fs::create_dir_all(working_directory).await?;
    Ok(existed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stub::CountingOperation;
    use crate::graph::{InputPort, Node, OutputPort};

    fn step(name: &str) -> Node {
        Node::declare(
            name,
            vec![InputPort::required("in_file", ValueType::File)],
            vec![OutputPort::new("out_file", ValueType::File)],
            CountingOperation::new(&["out_file"]),
        )
    }

    fn diamond() -> Graph {
        let mut graph = Graph::new("diamond");
        for name in ["source", "left", "right", "join"] {
            graph.add_node(step(name)).unwrap();
        }
        graph
            .add_node(
                Node::declare(
                    "merge",
                    vec![
                        InputPort::required("a", ValueType::File),
                        InputPort::required("b", ValueType::File),
                    ],
                    vec![OutputPort::new("out_file", ValueType::File)],
                    CountingOperation::new(&["out_file"]),
                ),
            )
            .unwrap();
        graph
            .set_parameter("source", "in_file", Value::Path("func.nii".into()))
            .unwrap();
        graph.connect("source", "out_file", "left", "in_file").unwrap();
        graph.connect("source", "out_file", "right", "in_file").unwrap();
        graph.connect("left", "out_file", "merge", "a").unwrap();
        graph.connect("right", "out_file", "merge", "b").unwrap();
        graph.connect("merge", "out_file", "join", "in_file").unwrap();
        graph
    }

    #[tokio::test]
    async fn test_dependency_counts_and_initial_queue() {
        let graph = diamond();
        let plan = expand(&graph).unwrap();
        let mut scheduler = Scheduler::new(
            &graph,
            &plan,
            PathBuf::from("/work/diamond"),
            FailureStrategy::ContinueOnError,
        );

        let merge = plan.instance("merge").unwrap().index;
        let join = plan.instance("join").unwrap().index;
        assert_eq!(scheduler.dependency_counts[merge], 2);
        assert_eq!(scheduler.dependency_counts[join], 1);
        assert_eq!(scheduler.queue.len(), 1);
        assert_eq!(scheduler.queue.pop(), plan.instance("source").map(|i| i.index));
    }

    #[tokio::test]
    async fn test_failure_blocks_transitive_descendants_only() {
        let graph = diamond();
        let plan = expand(&graph).unwrap();
        let mut scheduler = Scheduler::new(
            &graph,
            &plan,
            PathBuf::from("/work/diamond"),
            FailureStrategy::ContinueOnError,
        );
        let index = |id: &str| plan.instance(id).map(|i| i.index).unwrap();

        scheduler.queue.pop();
        let mut done = NodeOutcome::new(index("source"));
        done.state = NodeState::Completed { cached: false };
        done.outputs = BTreeMap::from([("out_file".to_string(), Value::Path("s.out".into()))]);
        scheduler.settle(done).await;
        assert_eq!(scheduler.queue.len(), 2);

        let failure = NodeFailure::Internal {
            node: "left".into(),
            message: "boom".into(),
        };
        scheduler
            .settle(NodeOutcome::failed(index("left"), failure))
            .await;
        assert!(!scheduler.stop);

        let states = scheduler.states.lock().await;
        let blocked = NodeState::Blocked {
            origin: "left".into(),
        };
        assert_eq!(states[index("merge")], blocked);
        assert_eq!(states[index("join")], blocked);
        assert_eq!(states[index("right")], NodeState::Ready);
    }

    #[tokio::test]
    async fn test_prepare_resolves_upstream_outputs() {
        let graph = diamond();
        let plan = expand(&graph).unwrap();
        let mut scheduler = Scheduler::new(
            &graph,
            &plan,
            PathBuf::from("/work/diamond"),
            FailureStrategy::ContinueOnError,
        );
        let executor = WorkQueueExecutor::new("/work").with_timeout(Duration::from_secs(9));
        let source = plan.instance("source").unwrap().index;
        let left = plan.instance("left").unwrap().index;

        scheduler.results[source] = InstanceResult {
            outputs: BTreeMap::from([("out_file".to_string(), Value::Path("/w/s.out".into()))]),
            cache_key: Some("abc".into()),
            ..InstanceResult::default()
        };
        let job = scheduler.prepare(left, &executor).unwrap();

        assert_eq!(job.inputs["in_file"], Value::Path("/w/s.out".into()));
        assert_eq!(job.upstream_keys["source"], "abc");
        assert_eq!(job.working_directory, PathBuf::from("/work/diamond/left"));
        assert_eq!(job.timeout, Some(Duration::from_secs(9)));

        scheduler.results[source].outputs.clear();
        assert!(matches!(
            scheduler.prepare(left, &executor),
            Err(NodeFailure::InputResolution { .. })
        ));
    }
}
