// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::graph::{Value, ValueType};

type TransformFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// A named, pure function applied to a value on its way across a connection.
///
/// Transforms run when the consuming node's inputs are resolved, never at declaration time.
/// Typical use is deriving a scalar from a file, e.g. the slice count of a functional scan.
#[derive(Clone)]
pub struct Transform {
    name: String,
    output_type: ValueType,
    func: Arc<TransformFn>,
}

impl Transform {
    pub fn new<F>(name: &str, output_type: ValueType, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            output_type,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_type(&self) -> ValueType {
        self.output_type
    }

    /// Runs the transform. A panic is reported as an error like any other failure.
    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.func)(value))).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("panicked: {}", message))
        })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("output_type", &self.output_type)
            .finish()
    }
}

/// Directed data dependency from one node's output to another node's input.
#[derive(Debug, Clone)]
pub struct Connection {
    pub source: String,
    pub source_output: String,
    pub transform: Option<Transform>,
    pub dest: String,
    pub dest_input: String,
}

impl Connection {
    /// Resolves the value delivered to the destination from the value the source produced.
    pub fn deliver(&self, produced: &Value) -> Result<Value, String> {
        match &self.transform {
            Some(transform) => transform
                .apply(produced)
                .map_err(|e| format!("transform '{}' failed: {}", transform.name(), e)),
            None => Ok(produced.clone()),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.source_output)?;
        if let Some(transform) = &self.transform {
            write!(f, " |{}|", transform.name())?;
        }
        write!(f, " -> {}.{}", self.dest, self.dest_input)
    }
}
