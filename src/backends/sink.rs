// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The terminal node that organizes results into the final output tree.
//!
//! Each sink input is named `category.@name`: dot-separated components become folders,
//! except components starting with `@`, which only name the field. With parameterization
//! on (the default), the run instance discriminator is inserted below the category folder
//! so that e.g. each smoothing kernel gets its own folder:
//!
//! ```text
//! <output_root>/<container>/functional/_fwhm_4/smoothed.nii.gz
//! <output_root>/<container>/functional/_fwhm_6/smoothed.nii.gz
//! ```
//!
//! Substitutions are applied, in order, to the destination path relative to the output
//! root.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::graph::{InputPort, Node, NodeKind, OutputPort, Value, ValueType};
use crate::observability::messages::node::SinkFileCopied;
use crate::observability::messages::StructuredLog;
use crate::traits::{Invocation, Invoked, Operation, OperationError};

/// Output of every sink: the list of files it wrote.
pub const SINK_OUTPUT: &str = "out_files";

pub struct Sink;

impl Sink {
    pub fn builder(name: &str, output_root: impl AsRef<Path>) -> SinkBuilder {
        SinkBuilder {
            name: name.to_string(),
            operation: SinkOperation {
                output_root: output_root.as_ref().to_path_buf(),
                container: None,
                substitutions: Vec::new(),
                parameterization: true,
            },
            fields: Vec::new(),
        }
    }
}

pub struct SinkBuilder {
    name: String,
    operation: SinkOperation,
    fields: Vec<String>,
}

impl SinkBuilder {
    /// Folder directly below the output root, typically the subject id.
    pub fn container(mut self, container: &str) -> Self {
        self.operation.container = Some(container.to_string());
        self
    }

    /// Declares an input field such as `functional.@smooth`.
    pub fn input(mut self, field: &str) -> Self {
        self.fields.push(field.to_string());
        self
    }

    pub fn substitution(mut self, from: &str, to: &str) -> Self {
        self.operation
            .substitutions
            .push((from.to_string(), to.to_string()));
        self
    }

    pub fn parameterization(mut self, enabled: bool) -> Self {
        self.operation.parameterization = enabled;
        self
    }

    pub fn build(self) -> Node {
        let inputs = self
            .fields
            .iter()
            .map(|field| InputPort::required(field, ValueType::Any))
            .collect();
        Node::declare(
            &self.name,
            inputs,
            vec![OutputPort::new(SINK_OUTPUT, ValueType::List)],
            self.operation,
        )
        .with_kind(NodeKind::Sink)
    }
}

pub struct SinkOperation {
    output_root: PathBuf,
    container: Option<String>,
    substitutions: Vec<(String, String)>,
    parameterization: bool,
}

impl SinkOperation {
    /// Destination of `file` delivered to `field`, relative to the output root.
    fn relative_destination(&self, field: &str, discriminator: &str, file: &Path) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(container) = &self.container {
            parts.push(container);
        }
        parts.extend(
            field
                .split('.')
                .filter(|component| !component.is_empty() && !component.starts_with('@')),
        );
        if self.parameterization && !discriminator.is_empty() {
            parts.push(discriminator);
        }

        let file_name = file
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut relative = parts
            .iter()
            .map(|p| p.to_string())
            .chain(std::iter::once(file_name))
            .collect::<Vec<_>>()
            .join("/");

        for (from, to) in &self.substitutions {
            relative = relative.replace(from.as_str(), to);
        }
        relative
    }
}

fn files_of(field: &str, value: &Value, out: &mut Vec<PathBuf>) -> Result<(), OperationError> {
    match value {
        Value::Path(p) => out.push(p.clone()),
        Value::Str(s) => out.push(PathBuf::from(s)),
        Value::List(items) => {
            for item in items {
                files_of(field, item, out)?;
            }
        }
        other => {
            return Err(OperationError::new(format!(
                "sink field '{}' received a non-file value: {}",
                field, other
            )))
        }
    }
    Ok(())
}

#[async_trait]
impl Operation for SinkOperation {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError> {
        let mut written = Vec::new();

        for (field, value) in &invocation.parameters {
            let mut files = Vec::new();
            files_of(field, value, &mut files)?;

            for source in files {
                let relative = self.relative_destination(field, &invocation.discriminator, &source);
                let destination = self.output_root.join(&relative);
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&source, &destination).await.map_err(|e| {
                    OperationError::new(format!(
                        "failed to copy {} to {}: {}",
                        source.display(),
                        destination.display(),
                        e
                    ))
                    .with_partial_outputs(BTreeMap::from([(
                        SINK_OUTPUT.to_string(),
                        Value::List(written.clone()),
                    )]))
                })?;

                SinkFileCopied {
                    instance: &invocation.instance,
                    source: &source,
                    destination: &destination,
                }
                .log();
                written.push(Value::Path(destination));
            }
        }

        Ok(Invoked::success(BTreeMap::from([(
            SINK_OUTPUT.to_string(),
            Value::List(written),
        )])))
    }

    fn name(&self) -> &'static str {
        "sink"
    }

    fn fingerprint(&self) -> String {
        let substitutions = self
            .substitutions
            .iter()
            .map(|(from, to)| format!("{}=>{}", from, to))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "sink:{}|{}|{}|{}",
            self.output_root.display(),
            self.container.as_deref().unwrap_or(""),
            substitutions,
            self.parameterization
        )
    }
}
