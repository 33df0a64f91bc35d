// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::traits::{Invocation, Invoked, Operation, OperationError};

/// Forwards named inputs to identically named outputs.
///
/// Mostly used as the source of an iterable, e.g. one functional scan per instance.
pub struct IdentityOperation {
    fields: Vec<String>,
}

impl IdentityOperation {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Operation for IdentityOperation {
    async fn invoke(&self, invocation: &Invocation) -> Result<Invoked, OperationError> {
        let outputs: BTreeMap<_, _> = self
            .fields
            .iter()
            .filter_map(|field| {
                invocation
                    .parameter(field)
                    .map(|value| (field.clone(), value.clone()))
            })
            .collect();
        Ok(Invoked::success(outputs))
    }

    fn name(&self) -> &'static str {
        "identity"
    }

    fn fingerprint(&self) -> String {
        format!("identity:{}", self.fields.join(","))
    }
}
