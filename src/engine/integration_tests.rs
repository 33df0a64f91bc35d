// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::stub::{
    BrokenFingerprintOperation, CountingOperation, FailingOperation, NonZeroExitOperation,
    SleepingOperation,
};
use crate::backends::Sink;
use crate::config::{CacheOptions, CorruptionPolicy, HashMethod, RetryPolicy};
use crate::engine::{NodeState, RunControl, RunStatus, WorkQueueExecutor};
use crate::errors::{FailureStrategy, NodeFailure, RunError};
use crate::graph::{Graph, InputPort, Node, OutputPort, Transform, Value, ValueType};
use crate::traits::Operation;

/// End-to-end runs of the work queue executor against real working directories.
#[cfg(test)]
mod tests {
    use super::*;

    /// A processing step reading `in_file` and writing `out_file`.
    fn step(name: &str, operation: impl Operation + 'static) -> Node {
        Node::declare(
            name,
            vec![InputPort::required("in_file", ValueType::File)],
            vec![OutputPort::new("out_file", ValueType::File)],
            operation,
        )
    }

    fn counting(counter: &Arc<AtomicUsize>) -> CountingOperation {
        CountingOperation::with_counter(&["out_file"], Arc::clone(counter))
    }

    fn functional_scan(dir: &Path) -> Value {
        let path = dir.join("func.nii");
        std::fs::write(&path, "bold").unwrap();
        Value::Path(path)
    }

    /// `trim -> realign -> smooth` with `smooth.fwhm` over `[4, 6]`, plus
    /// `trim -> skullstrip` as an independent branch.
    fn preprocessing(scan: &Value, cost: &str, counter: &Arc<AtomicUsize>) -> Graph {
        let mut graph = Graph::new("sub-01");
        graph.add_node(step("trim", counting(counter))).unwrap();
        graph
            .add_node(
                step("realign", counting(counter))
                    .with_input(InputPort::required("cost", ValueType::Scalar)),
            )
            .unwrap();
        graph
            .add_node(
                step("smooth", counting(counter))
                    .with_input(InputPort::required("fwhm", ValueType::Scalar)),
            )
            .unwrap();
        graph.add_node(step("skullstrip", counting(counter))).unwrap();

        graph.set_parameter("trim", "in_file", scan.clone()).unwrap();
        graph.set_parameter("realign", "cost", Value::from(cost)).unwrap();
        graph.connect("trim", "out_file", "realign", "in_file").unwrap();
        graph.connect("realign", "out_file", "smooth", "in_file").unwrap();
        graph.connect("trim", "out_file", "skullstrip", "in_file").unwrap();
        graph
            .mark_iterable("smooth", "fwhm", vec![Value::Int(4), Value::Int(6)])
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_pipeline_expands_and_runs_every_instance() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = preprocessing(&functional_scan(work.path()), "mutualinfo", &counter);

        let executor = WorkQueueExecutor::new(work.path().join("work")).with_max_workers(2);
        let report = executor.run(&graph).await.unwrap();

        assert!(report.is_success(), "{}", report);
        assert_eq!(report.invocations, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(report.run_instances.len(), 2);
        assert_eq!(
            report.run_instance("_fwhm_6").map(|r| r.members.clone()),
            Some(vec![
                "trim".to_string(),
                "realign".to_string(),
                "_fwhm_6/smooth".to_string(),
                "skullstrip".to_string(),
            ])
        );

        let smooth = report.node("_fwhm_4/smooth").unwrap();
        let expected = work.path().join("work/sub-01/_fwhm_4/smooth/out_file.out");
        assert_eq!(smooth.output("out_file"), Some(&Value::Path(expected.clone())));
        let content = std::fs::read_to_string(expected).unwrap();
        assert!(content.contains("fwhm=4"));
        assert!(work
            .path()
            .join("work/sub-01/_fwhm_4/smooth/_node_record.json")
            .exists());
    }

    #[tokio::test]
    async fn test_rerun_is_served_from_cache() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let scan = functional_scan(work.path());
        let graph = preprocessing(&scan, "mutualinfo", &counter);

        let first = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();
        assert_eq!(first.invocations, 5);

        // a fresh executor has to find the records on disk
        let second = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();
        assert_eq!(second.invocations, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        for node in &second.nodes {
            assert_eq!(node.state, NodeState::Completed { cached: true }, "{}", node.instance);
            assert_eq!(node.outputs, first.node(&node.instance).unwrap().outputs);
        }
    }

    #[tokio::test]
    async fn test_parameter_change_reruns_only_descendants() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let scan = functional_scan(work.path());
        let executor = WorkQueueExecutor::new(work.path());

        executor
            .run(&preprocessing(&scan, "mutualinfo", &counter))
            .await
            .unwrap();
        let report = executor
            .run(&preprocessing(&scan, "normcorr", &counter))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.invocations, 3);
        assert_eq!(report.state("trim"), Some(&NodeState::Completed { cached: true }));
        assert_eq!(
            report.state("skullstrip"),
            Some(&NodeState::Completed { cached: true })
        );
        assert_eq!(report.state("realign"), Some(&NodeState::Completed { cached: false }));
        assert_eq!(
            report.state("_fwhm_6/smooth"),
            Some(&NodeState::Completed { cached: false })
        );
    }

    #[tokio::test]
    async fn test_failure_blocks_only_reachable_instances() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut graph = Graph::new("sub-01");
        graph.add_node(step("trim", counting(&counter))).unwrap();
        graph
            .add_node(step("realign", FailingOperation::new("mcflirt: cannot open file")))
            .unwrap();
        graph
            .add_node(
                step("smooth", counting(&counter))
                    .with_input(InputPort::required("fwhm", ValueType::Scalar)),
            )
            .unwrap();
        graph.add_node(step("skullstrip", counting(&counter))).unwrap();
        graph
            .set_parameter("trim", "in_file", functional_scan(work.path()))
            .unwrap();
        graph.connect("trim", "out_file", "realign", "in_file").unwrap();
        graph.connect("realign", "out_file", "smooth", "in_file").unwrap();
        graph.connect("trim", "out_file", "skullstrip", "in_file").unwrap();
        graph
            .mark_iterable("smooth", "fwhm", vec![Value::Int(4), Value::Int(6)])
            .unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.state("trim").unwrap().is_completed());
        assert!(report.state("skullstrip").unwrap().is_completed());
        match report.state("realign") {
            Some(NodeState::Failed(NodeFailure::Execution(error))) => {
                assert_eq!(error.exit_status, Some(1));
                assert!(error.message.contains("cannot open file"));
            }
            other => panic!("unexpected state: {:?}", other),
        }
        for smooth in ["_fwhm_4/smooth", "_fwhm_6/smooth"] {
            assert_eq!(
                report.state(smooth),
                Some(&NodeState::Blocked {
                    origin: "realign".into()
                })
            );
        }
        assert!(report
            .run_instances
            .iter()
            .all(|r| r.status == RunStatus::Failed));

        assert_eq!(report.failures().len(), 1);
        assert!(matches!(
            report.into_result(),
            Err(RunError::Failed { failures }) if failures[0].0 == "realign"
        ));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_scheduling() {
        let work = tempfile::tempdir().unwrap();
        let good = CountingOperation::new(&["out_file"]);
        let good_count = good.counter();

        let mut graph = Graph::new("fail-fast");
        graph
            .add_node(Node::declare("bad", vec![], vec![], FailingOperation::new("boom")))
            .unwrap();
        graph
            .add_node(Node::declare(
                "good",
                vec![],
                vec![OutputPort::new("out_file", ValueType::File)],
                good,
            ))
            .unwrap();
        graph
            .add_node(step("after", CountingOperation::new(&["out_file"])))
            .unwrap();
        graph.connect("good", "out_file", "after", "in_file").unwrap();

        let report = WorkQueueExecutor::new(work.path())
            .with_max_workers(1)
            .with_failure_strategy(FailureStrategy::FailFast)
            .run(&graph)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(matches!(report.state("bad"), Some(NodeState::Failed(_))));
        assert_eq!(report.state("good"), Some(&NodeState::Cancelled));
        assert_eq!(report.state("after"), Some(&NodeState::Cancelled));
        assert_eq!(good_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_fails_node() {
        let work = tempfile::tempdir().unwrap();
        let mut graph = Graph::new("slow");
        graph
            .add_node(
                Node::declare(
                    "recon",
                    vec![],
                    vec![],
                    SleepingOperation::new(Duration::from_secs(30)),
                )
                .with_timeout(Duration::from_millis(50)),
            )
            .unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        assert_eq!(
            report.state("recon"),
            Some(&NodeState::Failed(NodeFailure::Timeout {
                node: "recon".into(),
                limit: Duration::from_millis(50),
            }))
        );
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let work = tempfile::tempdir().unwrap();
        let flaky = FailingOperation::flaky("license server busy", 2, &["out_file"]);
        let attempts = flaky.counter();

        let mut graph = Graph::new("retry");
        graph
            .add_node(Node::declare(
                "segment",
                vec![],
                vec![OutputPort::new("out_file", ValueType::File)],
                flaky,
            ))
            .unwrap();

        let report = WorkQueueExecutor::new(work.path())
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
            .run(&graph)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(report.invocations, 3);
        assert_eq!(report.node("segment").unwrap().attempts, 3);

        // each attempt starts from an empty working directory
        let working_directory = &report.node("segment").unwrap().working_directory;
        assert!(!working_directory.join("attempt_1.partial").exists());
        assert!(!working_directory.join("attempt_2.partial").exists());
        assert!(working_directory.join("out_file.out").exists());
    }

    #[tokio::test]
    async fn test_retries_are_bounded_by_max_attempts() {
        let work = tempfile::tempdir().unwrap();
        let flaky = FailingOperation::flaky("license server busy", 5, &["out_file"]);
        let attempts = flaky.counter();

        let mut graph = Graph::new("retry");
        graph
            .add_node(
                Node::declare(
                    "segment",
                    vec![],
                    vec![OutputPort::new("out_file", ValueType::File)],
                    flaky,
                )
                .with_retry(RetryPolicy::new(2, Duration::ZERO)),
            )
            .unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        assert!(matches!(report.state("segment"), Some(NodeState::Failed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_and_pending() {
        let work = tempfile::tempdir().unwrap();
        let after = CountingOperation::new(&["out_file"]);
        let after_count = after.counter();

        let mut graph = Graph::new("cancel");
        graph
            .add_node(Node::declare(
                "recon",
                vec![],
                vec![OutputPort::new("out_file", ValueType::File)],
                SleepingOperation::new(Duration::from_secs(30)),
            ))
            .unwrap();
        graph.add_node(step("after", after)).unwrap();
        graph.connect("recon", "out_file", "after", "in_file").unwrap();

        let control = RunControl::new();
        let handle = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let report = WorkQueueExecutor::new(work.path())
            .run_with_control(&graph, control)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.state("recon"), Some(&NodeState::Cancelled));
        assert_eq!(report.state("after"), Some(&NodeState::Cancelled));
        assert_eq!(after_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_one_run_instance() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = preprocessing(&functional_scan(work.path()), "mutualinfo", &counter);

        let control = RunControl::new();
        control.cancel_instance("_fwhm_6").await;
        let report = WorkQueueExecutor::new(work.path())
            .run_with_control(&graph, control)
            .await
            .unwrap();

        assert_eq!(report.state("_fwhm_6/smooth"), Some(&NodeState::Cancelled));
        assert!(report.state("_fwhm_4/smooth").unwrap().is_completed());
        assert!(report.state("realign").unwrap().is_completed());
        assert_eq!(
            report.run_instance("_fwhm_4").map(|r| r.status),
            Some(RunStatus::Completed)
        );
        assert_eq!(
            report.run_instance("_fwhm_6").map(|r| r.status),
            Some(RunStatus::Cancelled)
        );
        assert_eq!(report.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_cached_output_is_corruption() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = preprocessing(&functional_scan(work.path()), "mutualinfo", &counter);

        let first = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();
        let smoothed = first
            .node("_fwhm_4/smooth")
            .and_then(|n| n.output("out_file"))
            .and_then(|v| v.as_path())
            .unwrap()
            .to_path_buf();
        std::fs::remove_file(&smoothed).unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();
        match report.state("_fwhm_4/smooth") {
            Some(NodeState::Failed(NodeFailure::CacheCorruption(error))) => {
                assert_eq!(error.missing, vec![smoothed.display().to_string()]);
            }
            other => panic!("unexpected state: {:?}", other),
        }
        assert_eq!(report.invocations, 0);
        assert_eq!(
            report.run_instance("_fwhm_6").map(|r| r.status),
            Some(RunStatus::Completed)
        );

        let rerun = WorkQueueExecutor::new(work.path())
            .with_cache_options(CacheOptions {
                on_corruption: CorruptionPolicy::Rerun,
                ..CacheOptions::default()
            })
            .run(&graph)
            .await
            .unwrap();
        assert!(rerun.is_success());
        assert_eq!(rerun.invocations, 1);
        assert!(smoothed.exists());
    }

    #[tokio::test]
    async fn test_force_rerun_ignores_records() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = preprocessing(&functional_scan(work.path()), "mutualinfo", &counter);
        let executor = WorkQueueExecutor::new(work.path());
        executor.run(&graph).await.unwrap();

        let forced = executor
            .with_cache_options(CacheOptions {
                force_rerun: true,
                ..CacheOptions::default()
            })
            .run(&graph)
            .await
            .unwrap();
        assert_eq!(forced.invocations, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_sink_organizes_outputs_per_run_instance() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = preprocessing(&functional_scan(work.path()), "mutualinfo", &counter);

        graph
            .add_node(
                Sink::builder("datasink", out.path())
                    .container("sub-01")
                    .input("functional.@smooth")
                    .input("structural.@brain")
                    .substitution("_fwhm_", "fwhm_")
                    .build(),
            )
            .unwrap();
        graph
            .connect("smooth", "out_file", "datasink", "functional.@smooth")
            .unwrap();
        graph
            .connect("skullstrip", "out_file", "datasink", "structural.@brain")
            .unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();
        assert!(report.is_success(), "{}", report);

        for kernel in ["4", "6"] {
            let functional = out
                .path()
                .join(format!("sub-01/functional/fwhm_{}/out_file.out", kernel));
            assert!(functional.exists(), "{}", functional.display());
            let structural = out
                .path()
                .join(format!("sub-01/structural/fwhm_{}/out_file.out", kernel));
            assert!(structural.exists(), "{}", structural.display());
        }
        assert!(report.node("_fwhm_4/datasink").is_some());
    }

    #[tokio::test]
    async fn test_non_zero_exit_and_missing_outputs_fail() {
        let work = tempfile::tempdir().unwrap();
        let mut graph = Graph::new("broken");
        graph
            .add_node(Node::declare("exits", vec![], vec![], NonZeroExitOperation))
            .unwrap();
        graph
            .add_node(Node::declare(
                "silent",
                vec![],
                vec![OutputPort::new("out_file", ValueType::File)],
                CountingOperation::new(&[]),
            ))
            .unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        match report.state("exits") {
            Some(NodeState::Failed(NodeFailure::Execution(error))) => {
                assert_eq!(error.exit_status, Some(3))
            }
            other => panic!("unexpected state: {:?}", other),
        }
        match report.state("silent") {
            Some(NodeState::Failed(NodeFailure::Execution(error))) => {
                assert!(error.message.contains("'out_file' is missing"), "{}", error.message)
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_transform_fails_consumer() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut graph = Graph::new("transform");
        graph.add_node(step("realign", counting(&counter))).unwrap();
        graph
            .add_node(Node::declare(
                "slicetime",
                vec![InputPort::required("n_slices", ValueType::Scalar)],
                vec![OutputPort::new("out_file", ValueType::File)],
                counting(&counter),
            ))
            .unwrap();
        graph.add_node(step("smooth", counting(&counter))).unwrap();
        graph
            .set_parameter("realign", "in_file", functional_scan(work.path()))
            .unwrap();
        graph
            .connect_with(
                "realign",
                "out_file",
                Transform::new("n_slices", ValueType::Scalar, |_| {
                    Err("no NIfTI header".to_string())
                }),
                "slicetime",
                "n_slices",
            )
            .unwrap();
        graph.connect("slicetime", "out_file", "smooth", "in_file").unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        match report.state("slicetime") {
            Some(NodeState::Failed(NodeFailure::InputResolution { message, .. })) => {
                assert!(message.contains("no NIfTI header"), "{}", message)
            }
            other => panic!("unexpected state: {:?}", other),
        }
        assert_eq!(
            report.state("smooth"),
            Some(&NodeState::Blocked {
                origin: "slicetime".into()
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_transform_fails_consumer() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut graph = Graph::new("transform");
        graph.add_node(step("realign", counting(&counter))).unwrap();
        graph.add_node(step("smooth", counting(&counter))).unwrap();
        graph
            .set_parameter("realign", "in_file", functional_scan(work.path()))
            .unwrap();
        graph
            .connect_with(
                "realign",
                "out_file",
                Transform::new("header", ValueType::File, |_| panic!("truncated header")),
                "smooth",
                "in_file",
            )
            .unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        match report.state("smooth") {
            Some(NodeState::Failed(NodeFailure::InputResolution { message, .. })) => {
                assert!(message.contains("truncated header"), "{}", message)
            }
            other => panic!("unexpected state: {:?}", other),
        }
        assert_eq!(report.state("realign"), Some(&NodeState::Completed { cached: false }));
    }

    #[tokio::test]
    async fn test_crashed_worker_blocks_descendants() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut graph = Graph::new("crash");
        graph
            .add_node(Node::declare(
                "reorient",
                vec![],
                vec![OutputPort::new("out_file", ValueType::Any)],
                BrokenFingerprintOperation,
            ))
            .unwrap();
        graph.add_node(step("smooth", counting(&counter))).unwrap();
        graph.add_node(step("skullstrip", counting(&counter))).unwrap();
        graph.connect("reorient", "out_file", "smooth", "in_file").unwrap();
        graph
            .set_parameter("skullstrip", "in_file", functional_scan(work.path()))
            .unwrap();

        let report = WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        match report.state("reorient") {
            Some(NodeState::Failed(NodeFailure::Internal { message, .. })) => {
                assert!(message.contains("worker task failed"), "{}", message)
            }
            other => panic!("unexpected state: {:?}", other),
        }
        assert_eq!(
            report.state("smooth"),
            Some(&NodeState::Blocked {
                origin: "reorient".into()
            })
        );
        assert_eq!(report.state("skullstrip"), Some(&NodeState::Completed { cached: false }));
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_string_file_input_is_fingerprinted() {
        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let scan = work.path().join("func.nii");
        std::fs::write(&scan, "bold run 1").unwrap();

        let mut graph = Graph::new("str-input");
        graph.add_node(step("trim", counting(&counter))).unwrap();
        graph
            .set_parameter("trim", "in_file", Value::Str(scan.display().to_string()))
            .unwrap();

        let executor = WorkQueueExecutor::new(work.path().join("work")).with_cache_options(
            CacheOptions {
                hash_method: HashMethod::Content,
                ..CacheOptions::default()
            },
        );
        executor.run(&graph).await.unwrap();
        assert_eq!(executor.run(&graph).await.unwrap().invocations, 0);

        std::fs::write(&scan, "bold run 2").unwrap();
        let report = executor.run(&graph).await.unwrap();
        assert_eq!(report.invocations, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_node_events_carry_instance_span() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let work = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new("spans");
        graph.add_node(step("trim", counting(&counter))).unwrap();
        graph
            .set_parameter("trim", "in_file", functional_scan(work.path()))
            .unwrap();
        WorkQueueExecutor::new(work.path()).run(&graph).await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let started = output
            .lines()
            .find(|line| line.contains("Running 'trim'"))
            .unwrap_or_else(|| panic!("no start event in:\n{}", output));
        assert!(started.contains("node{"), "{}", started);
        assert!(started.contains("node_execution"), "{}", started);
    }

    #[tokio::test]
    async fn test_invalid_graphs_are_rejected_before_execution() {
        let work = tempfile::tempdir().unwrap();
        let executor = WorkQueueExecutor::new(work.path());

        let mut unbound = Graph::new("unbound");
        unbound
            .add_node(step("trim", CountingOperation::new(&["out_file"])))
            .unwrap();
        assert!(matches!(
            executor.run(&unbound).await,
            Err(RunError::Construction(errors)) if errors.len() == 1
        ));

        let mut nested = Graph::new("nested");
        nested
            .add_node(
                step("ds", CountingOperation::new(&["out_file"]))
                    .with_input(InputPort::required("task", ValueType::Scalar)),
            )
            .unwrap();
        nested
            .add_node(
                step("smooth", CountingOperation::new(&["out_file"]))
                    .with_input(InputPort::required("fwhm", ValueType::Scalar)),
            )
            .unwrap();
        nested
            .set_parameter("ds", "in_file", Value::Path("bids".into()))
            .unwrap();
        nested.connect("ds", "out_file", "smooth", "in_file").unwrap();
        nested
            .mark_iterable("ds", "task", vec!["rest".into(), "nback".into()])
            .unwrap();
        nested
            .mark_iterable("smooth", "fwhm", vec![Value::Int(5), Value::Int(8)])
            .unwrap();
        assert!(matches!(
            executor.run(&nested).await,
            Err(RunError::Expansion(_))
        ));
        assert!(!work.path().join("nested").exists());
    }
}
