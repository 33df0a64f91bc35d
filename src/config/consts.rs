// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Base directory for working directories when none is configured
pub const DEFAULT_BASE_DIR: &str = "./work";
/// Worker count used when the available parallelism cannot be detected
pub const FALLBACK_MAX_WORKERS: usize = 4;
/// Invocations per node when no retry policy is configured (no retries)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
/// Backoff growth between retries; 1.0 keeps a fixed delay
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;

/// Cache record written into every completed working directory
pub const NODE_RECORD_FILE: &str = "_node_record.json";
/// Captured standard output of external commands
pub const STDOUT_LOG_FILE: &str = "_stdout.log";
/// Captured standard error of external commands
pub const STDERR_LOG_FILE: &str = "_stderr.log";
/// Lines of stderr quoted in a failed command's diagnostic message
pub const STDERR_TAIL_LINES: usize = 20;
