// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Values flowing between nodes and the semantic port types they are checked against.
//!
//! A [`Value`] is what a static parameter holds, what an operation returns for one of its
//! outputs, and what a connection delivers to a downstream input. Values are serializable so
//! they can be hashed canonically into cache keys and persisted in cache records.
//!
//! # Conformance
//!
//! | Port type | Accepted values                    |
//! |-----------|------------------------------------|
//! | `File`    | `Path`, `Str`                      |
//! | `Scalar`  | `Bool`, `Int`, `Float`, `Str`      |
//! | `List`    | `List`                             |
//! | `Any`     | everything                         |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A concrete value bound to a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Path(PathBuf),
    List(Vec<Value>),
}

impl Value {
    /// The port type this value naturally has.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Path(_) => ValueType::File,
            Value::List(_) => ValueType::List,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => ValueType::Scalar,
        }
    }

    /// Whether this value may be bound to a port of type `expected`.
    pub fn conforms_to(&self, expected: ValueType) -> bool {
        match expected {
            ValueType::Any => true,
            ValueType::File => matches!(self, Value::Path(_) | Value::Str(_)),
            ValueType::Scalar => matches!(
                self,
                Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
            ),
            ValueType::List => matches!(self, Value::List(_)),
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Value::Path(p) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The value as stored on a port of type `expected`. Strings on `File` ports become
    /// paths so they are fingerprinted and checked like any other file.
    pub fn bound_to(self, expected: ValueType) -> Value {
        match (self, expected) {
            (Value::Str(s), ValueType::File) => Value::Path(PathBuf::from(s)),
            (other, _) => other,
        }
    }

    /// Every file path referenced by this value, descending into lists.
    pub fn paths(&self) -> Vec<&Path> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            Value::Path(p) => out.push(p.as_path()),
            Value::List(items) => items.iter().for_each(|item| item.collect_paths(out)),
            _ => {}
        }
    }

    /// Renders the value as command-line arguments; lists expand to one argument per element.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Value::List(items) => items.iter().flat_map(Value::to_args).collect(),
            other => vec![other.to_string()],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Path(p) => write!(f, "{}", p.display()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<PathBuf> for Value {
    fn from(value: PathBuf) -> Self {
        Value::Path(value)
    }
}

impl From<&Path> for Value {
    fn from(value: &Path) -> Self {
        Value::Path(value.to_path_buf())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// Semantic type of an input or output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    File,
    Scalar,
    List,
    Any,
}

impl ValueType {
    /// Whether a value produced as `self` can be delivered to a port typed `other`.
    pub fn is_compatible_with(self, other: ValueType) -> bool {
        self == other || self == ValueType::Any || other == ValueType::Any
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::File => "file",
            ValueType::Scalar => "scalar",
            ValueType::List => "list",
            ValueType::Any => "any",
        };
        write!(f, "{}", name)
    }
}
