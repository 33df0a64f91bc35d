// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! External command-line tools.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use crate::config::consts::{STDERR_LOG_FILE, STDERR_TAIL_LINES, STDOUT_LOG_FILE};
use crate::graph::Value;
use crate::observability::messages::node::{CommandExited, CommandLaunched};
use crate::observability::messages::StructuredLog;
use crate::traits::{Invocation, Invoked, Operation, OperationError};

/// Runs an external executable inside the node's working directory.
///
/// The executable is looked up by logical tool name in the invocation's
/// [`ToolConfig`](crate::config::ToolConfig), so `matlab` can resolve to
/// `matlab -nodesktop -nosplash` on one machine and something else on another.
///
/// Arguments and outputs are templates. `{name}` is replaced by the resolved input `name`;
/// `{name.file_name}` by the final path component of a file input. An argument that is
/// exactly `{name}` and resolves to a list expands to one argument per element. Output
/// templates are paths relative to the working directory and must exist once the tool
/// exits successfully.
///
/// # Example
/// ```
/// use preflow::backends::CommandOperation;
///
/// let bet = CommandOperation::new("bet")
///     .arg("{in_file}")
///     .arg("brain.nii.gz")
///     .arg("-f")
///     .arg("{frac}")
///     .output("out_file", "brain.nii.gz");
/// ```
#[derive(Debug, Clone)]
pub struct CommandOperation {
    tool: String,
    args: Vec<String>,
    outputs: BTreeMap<String, String>,
}

impl CommandOperation {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            args: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, template: &str) -> Self {
        self.args.push(template.to_string());
        self
    }

    pub fn args(mut self, templates: &[&str]) -> Self {
        self.args.extend(templates.iter().map(|s| s.to_string()));
        self
    }

    pub fn output(mut self, name: &str, template: &str) -> Self {
        self.outputs.insert(name.to_string(), template.to_string());
        self
    }

    fn render_args(&self, invocation: &Invocation) -> Result<Vec<String>, OperationError> {
        let mut rendered = Vec::with_capacity(self.args.len());
        for template in &self.args {
            if let Some(value) = whole_placeholder(template).and_then(|n| invocation.parameter(n)) {
                rendered.extend(value.to_args());
            } else {
                rendered.push(render(template, invocation)?);
            }
        }
        Ok(rendered)
    }

    fn collect_outputs(
        &self,
        invocation: &Invocation,
    ) -> Result<BTreeMap<String, Value>, OperationError> {
        let mut outputs = BTreeMap::new();
        let mut missing = Vec::new();
        for (name, template) in &self.outputs {
            let path = resolve_output(&invocation.working_directory, &render(template, invocation)?);
            if path.exists() {
                outputs.insert(name.clone(), Value::Path(path));
            } else {
                missing.push(format!("{} ({})", name, path.display()));
            }
        }

        if missing.is_empty() {
            Ok(outputs)
        } else {
            Err(OperationError::new(format!(
                "{} exited successfully but did not produce {}",
                self.tool,
                missing.join(", ")
            ))
            .with_partial_outputs(outputs))
        }
    }
}

#[async_trait]
impl Operation for CommandOperation {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError> {
        let mut command_line = invocation.tools.resolve(&self.tool);
        if command_line.is_empty() {
            return Err(OperationError::new(format!("tool '{}' has an empty command line", self.tool)));
        }
        let program = command_line.remove(0);
        let args = self.render_args(invocation)?;

        CommandLaunched {
            instance: &invocation.instance,
            program: &program,
            arg_count: command_line.len() + args.len(),
        }
        .log();

        let start = Instant::now();
        let output = Command::new(&program)
            .args(&command_line)
            .args(&args)
            .current_dir(&invocation.working_directory)
            .envs(&invocation.tools.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OperationError::new(format!("failed to launch '{}': {}", program, e)))?;

        let workdir = &invocation.working_directory;
        tokio::fs::write(workdir.join(STDOUT_LOG_FILE), &output.stdout).await?;
        tokio::fs::write(workdir.join(STDERR_LOG_FILE), &output.stderr).await?;

        let exit_status = output.status.code().unwrap_or(-1);
        CommandExited {
            instance: &invocation.instance,
            program: &program,
            exit_status,
            duration: start.elapsed(),
        }
        .log();

        if exit_status != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OperationError::new(format!(
                "{} exited with status {}{}",
                program,
                exit_status,
                stderr_tail(&stderr)
            ))
            .with_exit_status(exit_status));
        }

        Ok(Invoked::success(self.collect_outputs(invocation)?))
    }

    fn name(&self) -> &'static str {
        "command"
    }

    fn fingerprint(&self) -> String {
        let outputs = self
            .outputs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        format!("command:{} {} -> {}", self.tool, self.args.join(" "), outputs)
    }
}

/// The placeholder name if `template` is exactly `{name}`.
fn whole_placeholder(template: &str) -> Option<&str> {
    template
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .filter(|name| !name.contains(['{', '}']))
}

fn render(template: &str, invocation: &Invocation) -> Result<String, OperationError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| OperationError::new(format!("unterminated placeholder in '{}'", template)))?;
        rendered.push_str(&substitute(&after[..close], invocation)?);
        rest = &after[close + 1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn substitute(placeholder: &str, invocation: &Invocation) -> Result<String, OperationError> {
    let (name, file_name_only) = match placeholder.strip_suffix(".file_name") {
        Some(name) => (name, true),
        None => (placeholder, false),
    };
    let value = invocation.require(name)?;
    if !file_name_only {
        return Ok(value.to_string());
    }

    let text = value.to_string();
    Ok(Path::new(&text)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or(text))
}

fn resolve_output(working_directory: &Path, rendered: &str) -> PathBuf {
    let path = PathBuf::from(rendered);
    if path.is_absolute() {
        path
    } else {
        working_directory.join(path)
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    format!(":\n{}", lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use std::sync::Arc;

    fn invocation(dir: &Path, tools: ToolConfig, parameters: BTreeMap<String, Value>) -> Invocation {
        Invocation {
            node: "bet".into(),
            instance: "bet".into(),
            discriminator: String::new(),
            parameters,
            working_directory: dir.to_path_buf(),
            tools: Arc::new(tools),
        }
    }

    #[test]
    fn test_render_templates() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(
            dir.path(),
            ToolConfig::default(),
            BTreeMap::from([
                ("in_file".to_string(), Value::Path("/data/sub-01/anat.nii.gz".into())),
                ("frac".to_string(), Value::Float(0.5)),
                ("vols".to_string(), Value::from(vec![1i64, 2, 3])),
            ]),
        );

        let op = CommandOperation::new("bet")
            .arg("{in_file}")
            .arg("brain_{in_file.file_name}")
            .arg("-f")
            .arg("{frac}")
            .arg("{vols}");
        assert_eq!(
            op.render_args(&inv).unwrap(),
            vec![
                "/data/sub-01/anat.nii.gz",
                "brain_anat.nii.gz",
                "-f",
                "0.5",
                "1",
                "2",
                "3"
            ]
        );

        let missing = CommandOperation::new("bet").arg("{mask}");
        assert_eq!(
            missing.render_args(&inv).unwrap_err().message,
            "missing input 'mask'"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolConfig::default().with_command("shell", "sh -c");
        let inv = invocation(
            dir.path(),
            tools,
            BTreeMap::from([("name".to_string(), Value::from("brain"))]),
        );

        let op = CommandOperation::new("shell")
            .arg("echo hello > {name}.txt && echo done")
            .output("out_file", "{name}.txt");
        let invoked = op.invoke(&inv).await.unwrap();

        let out = dir.path().join("brain.txt");
        assert_eq!(invoked.outputs["out_file"], Value::Path(out.clone()));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "hello\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(STDOUT_LOG_FILE)).unwrap(),
            "done\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_carries_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolConfig::default().with_command("shell", "sh -c");
        let inv = invocation(dir.path(), tools, BTreeMap::new());

        let op = CommandOperation::new("shell").arg("echo 'no brain found' >&2; exit 4");
        let err = op.invoke(&inv).await.unwrap_err();

        assert_eq!(err.exit_status, Some(4));
        assert!(err.message.contains("no brain found"), "{}", err.message);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_declared_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolConfig::default().with_command("shell", "sh -c");
        let inv = invocation(dir.path(), tools, BTreeMap::new());

        let op = CommandOperation::new("shell")
            .arg("true")
            .output("out_file", "never.nii");
        let err = op.invoke(&inv).await.unwrap_err();
        assert!(err.message.contains("did not produce out_file"), "{}", err.message);
    }
}
