// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Result caching keyed on everything that determines a node's outputs.
//!
//! A node instance's cache key is the SHA-256 of a canonical JSON document holding the
//! graph name, instance id, node name, operation fingerprint, resolved inputs, the cache keys
//! of its upstream instances and a fingerprint of every file its inputs reference. Maps are
//! `BTreeMap`s so the serialized form, and therefore the key, is stable.
//!
//! On success the key and outputs are written to `_node_record.json` in the working
//! directory. A later run with the same key finds the record and skips the node, provided
//! every file the record mentions still exists.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;

use crate::config::consts::NODE_RECORD_FILE;
use crate::config::HashMethod;
use crate::graph::Value;

/// Everything folded into a cache key.
#[derive(Debug, Clone, Serialize)]
pub struct CacheKeyMaterial {
    pub graph: String,
    pub instance: String,
    pub node: String,
    pub operation: String,
    pub inputs: BTreeMap<String, Value>,
    /// Upstream instance id to that instance's cache key.
    pub upstream: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct CanonicalKey<'a> {
    material: &'a CacheKeyMaterial,
    hash_method: &'a str,
    files: BTreeMap<String, String>,
}

/// Hashes `material` together with fingerprints of the files it references.
///
/// Reads file metadata or contents, so callers on the async runtime should run it on the
/// blocking pool.
pub fn compute_cache_key(material: &CacheKeyMaterial, method: HashMethod) -> io::Result<String> {
    let mut files = BTreeMap::new();
    for value in material.inputs.values() {
        for path in value.paths() {
            let key = path.display().to_string();
            if !files.contains_key(&key) {
                files.insert(key, file_fingerprint(path, method)?);
            }
        }
    }

    let canonical = CanonicalKey {
        material,
        hash_method: match method {
            HashMethod::Timestamp => "timestamp",
            HashMethod::Content => "content",
        },
        files,
    };
    let json = serde_json::to_vec(&canonical).map_err(io::Error::other)?;
    Ok(hex::encode(Sha256::digest(&json)))
}

fn file_fingerprint(path: &Path, method: HashMethod) -> io::Result<String> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok("missing".to_string()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        return Ok("directory".to_string());
    }

    match method {
        HashMethod::Timestamp => {
            let modified = metadata
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(format!("{}:{}", metadata.len(), modified))
        }
        HashMethod::Content => {
            let mut hasher = Sha256::new();
            let mut file = File::open(path)?;
            io::copy(&mut file, &mut hasher)?;
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// The cache record persisted in a completed working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub cache_key: String,
    pub node: String,
    pub instance: String,
    pub outputs: BTreeMap<String, Value>,
}

impl NodeRecord {
    /// Recorded output files that no longer exist.
    pub fn missing_files(&self) -> Vec<String> {
        self.outputs
            .values()
            .flat_map(|v| v.paths())
            .filter(|p| !p.exists())
            .map(|p| p.display().to_string())
            .collect()
    }
}

/// What the cache knows about a working directory.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Nothing recorded.
    Miss,
    /// Recorded for the same key with all outputs present.
    Hit(NodeRecord),
    /// Recorded for the same key but files are gone.
    Corrupt { missing: Vec<String> },
    /// Recorded for a different key.
    Stale,
}

/// Records read or written during this executor's lifetime, keyed by working directory.
#[derive(Debug, Default)]
pub struct CacheIndex {
    records: Mutex<HashMap<PathBuf, NodeRecord>>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(&self, working_directory: &Path, cache_key: &str) -> io::Result<CacheLookup> {
        let known = self.records.lock().await.get(working_directory).cloned();
        let record = match known {
            Some(record) => Some(record),
            None => read_record(working_directory).await?,
        };

        let Some(record) = record else {
            return Ok(CacheLookup::Miss);
        };
        if record.cache_key != cache_key {
            self.forget(working_directory).await;
            return Ok(CacheLookup::Stale);
        }

        let missing = record.missing_files();
        if !missing.is_empty() {
            self.forget(working_directory).await;
            return Ok(CacheLookup::Corrupt { missing });
        }

        self.records
            .lock()
            .await
            .insert(working_directory.to_path_buf(), record.clone());
        Ok(CacheLookup::Hit(record))
    }

    /// Persists `record` and remembers it.
    pub async fn store(&self, working_directory: &Path, record: NodeRecord) -> io::Result<()> {
        write_record(working_directory, &record).await?;
        self.records
            .lock()
            .await
            .insert(working_directory.to_path_buf(), record);
        Ok(())
    }

    pub async fn forget(&self, working_directory: &Path) {
        self.records.lock().await.remove(working_directory);
    }
}

async fn read_record(working_directory: &Path) -> io::Result<Option<NodeRecord>> {
    let path = working_directory.join(NODE_RECORD_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    // An unreadable record (e.g. a run killed mid-write by an older version) is a miss.
    Ok(serde_json::from_slice(&bytes).ok())
}

/// Writes the record next to a temporary file and renames it into place.
async fn write_record(working_directory: &Path, record: &NodeRecord) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    let final_path = working_directory.join(NODE_RECORD_FILE);
    let temp_path = working_directory.join(format!("{}.tmp", NODE_RECORD_FILE));
    tokio::fs::write(&temp_path, json).await?;
    tokio::fs::rename(&temp_path, &final_path).await
}
