// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::graph::{InputPort, Node, OutputPort, Value, ValueType};
use crate::traits::{Invocation, Invoked, Operation, OperationError};

/// Collects `in1..inN` into a single list output `out`.
///
/// List inputs are spliced in rather than nested; unbound inputs are skipped.
pub struct MergeOperation {
    count: usize,
}

impl MergeOperation {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    /// A node with `count` optional inputs named `in1..in<count>` and one list output `out`.
    pub fn node(name: &str, count: usize) -> Node {
        let inputs = (1..=count)
            .map(|i| InputPort::optional(&format!("in{}", i), ValueType::Any))
            .collect();
        Node::declare(
            name,
            inputs,
            vec![OutputPort::new("out", ValueType::List)],
            MergeOperation::new(count),
        )
    }
}

#[async_trait]
impl Operation for MergeOperation {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError> {
        let mut merged = Vec::new();
        for i in 1..=self.count {
            match invocation.parameter(&format!("in{}", i)) {
                Some(Value::List(items)) => merged.extend(items.iter().cloned()),
                Some(value) => merged.push(value.clone()),
                None => {}
            }
        }
        Ok(Invoked::success(BTreeMap::from([(
            "out".to_string(),
            Value::List(merged),
        )])))
    }

    fn name(&self) -> &'static str {
        "merge"
    }

    fn fingerprint(&self) -> String {
        format!("merge:{}", self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_merge_splices_lists_and_skips_unbound() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation {
            node: "merge_distortion".into(),
            instance: "merge_distortion".into(),
            discriminator: String::new(),
            parameters: BTreeMap::from([
                ("in1".to_string(), Value::Path("ap.nii.gz".into())),
                (
                    "in3".to_string(),
                    Value::from(vec![Value::Path("pa1.nii.gz".into()), Value::Path("pa2.nii.gz".into())]),
                ),
            ]),
            working_directory: dir.path().to_path_buf(),
            tools: Arc::new(ToolConfig::default()),
        };

        let invoked = MergeOperation::new(3).invoke(&invocation).await.unwrap();
        assert_eq!(
            invoked.outputs["out"],
            Value::List(vec![
                Value::Path("ap.nii.gz".into()),
                Value::Path("pa1.nii.gz".into()),
                Value::Path("pa2.nii.gz".into()),
            ])
        );
    }

    #[test]
    fn test_merge_node_ports() {
        let node = MergeOperation::node("merge", 2);
        let inputs: Vec<&str> = node.inputs().map(|p| p.name.as_str()).collect();
        assert_eq!(inputs, vec!["in1", "in2"]);
        assert!(node.inputs().all(|p| !p.required));
        assert_eq!(node.output("out").map(|p| p.value_type), Some(ValueType::List));
    }
}
