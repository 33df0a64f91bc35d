// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use preflow::backends::{FunctionOperation, Sink};
use preflow::config::{load_and_validate_config, EngineConfig};
use preflow::engine::WorkQueueExecutor;
use preflow::graph::{Graph, InputPort, Node, OutputPort, Value, ValueType};
use preflow::traits::OperationError;

/// Writes a copy of `in_file` prefixed with `prefix`, annotated with the other inputs.
fn derived_file(name: &'static str, prefix: &'static str) -> FunctionOperation {
    FunctionOperation::new(name, move |inputs, working_directory| {
        let source = inputs
            .get("in_file")
            .and_then(Value::as_path)
            .ok_or_else(|| OperationError::new("missing input 'in_file'"))?;
        let file_name = source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = working_directory.join(format!("{}{}", prefix, file_name));

        let settings: Vec<String> = inputs
            .iter()
            .filter(|(input, _)| input.as_str() != "in_file")
            .map(|(input, value)| format!("{}={}", input, value))
            .collect();
        let mut content = std::fs::read_to_string(source)?;
        content.push_str(&format!("{} {}\n", name, settings.join(" ")));
        std::fs::write(&target, content)?;

        Ok(BTreeMap::from([("out_file".to_string(), Value::Path(target))]))
    })
}

fn step(name: &'static str, prefix: &'static str) -> Node {
    Node::declare(
        name,
        vec![InputPort::required("in_file", ValueType::File)],
        vec![OutputPort::new("out_file", ValueType::File)],
        derived_file(name, prefix),
    )
}

/// `trim -> realign -> smooth (fwhm 4, 6) -> datasink` for one subject.
fn demo_pipeline(scan: &Path, output_root: &Path) -> Result<Graph> {
    let mut graph = Graph::new("sub-01");

    graph.add_node(step("trim", "t_"))?;
    graph.add_node(
        step("realign", "r_").with_input(InputPort::required("cost", ValueType::Scalar)),
    )?;
    graph.add_node(step("smooth", "s_").with_input(InputPort::required("fwhm", ValueType::Scalar)))?;
    graph.add_node(
        Sink::builder("datasink", output_root)
            .container("sub-01")
            .input("functional.@smooth")
            .input("functional.mc.@realigned")
            .substitution("_fwhm_", "fwhm_")
            .build(),
    )?;

    graph.set_parameter("trim", "in_file", scan.to_path_buf())?;
    graph.set_parameter("realign", "cost", "mutualinfo")?;
    graph.mark_iterable("smooth", "fwhm", vec![Value::Int(4), Value::Int(6)])?;

    graph.connect("trim", "out_file", "realign", "in_file")?;
    graph.connect("realign", "out_file", "smooth", "in_file")?;
    graph.connect("smooth", "out_file", "datasink", "functional.@smooth")?;
    graph.connect("realign", "out_file", "datasink", "functional.mc.@realigned")?;

    Ok(graph)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <base_dir> [config.yaml|config.toml]", args[0]);
        eprintln!("Example: {} /tmp/preflow configs/local.yaml", args[0]);
        std::process::exit(1);
    }

    let mut config = match args.get(2) {
        Some(path) => load_and_validate_config(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => EngineConfig::default(),
    };
    config.base_dir = PathBuf::from(&args[1]);

    let input_dir = config.base_dir.join("input");
    std::fs::create_dir_all(&input_dir)
        .with_context(|| format!("failed to create {}", input_dir.display()))?;
    let scan = input_dir.join("func.nii");
    if !scan.exists() {
        std::fs::write(&scan, "bold run 1\n")
            .with_context(|| format!("failed to write {}", scan.display()))?;
    }

    let graph = demo_pipeline(&scan, &config.base_dir.join("output"))?;
    let executor = WorkQueueExecutor::from_config(&config);
    let report = executor.run(&graph).await?;

    println!("{}", report);
    report.into_result()?;
    Ok(())
}
