//! Run state threaded through every orchestration step.
//!
//! Steps never mutate the state directly: each one reads a `&RunState` and
//! returns a [`StateUpdate`], which the orchestrator merges with
//! [`RunState::apply`]. Fields left as `None` in an update keep their value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// How serious a review finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A single issue reported by the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Finding {
    pub file: String,
    pub severity: Severity,
    pub issue: String,
    pub suggestion: String,
}

/// Outcome of one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestResult {
    pub passed: bool,
    pub output: String,
}

impl TestResult {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }
}

/// Accumulated record for one invocation.
#[derive(Debug, Clone)]
pub(crate) struct RunState {
    pub repo_path: PathBuf,
    pub diff: String,
    pub files_touched: Vec<String>,
    pub file_contents: BTreeMap<String, String>,
    pub findings: Vec<Finding>,
    pub retrieved_memory: Vec<String>,
    /// `None` means no change is needed.
    pub patch: Option<String>,
    pub test_result: Option<TestResult>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub success: bool,
    pub error: Option<String>,
}

impl RunState {
    /// Creates the state for a fresh run: attempt 1, every accumulator empty.
    pub fn new(repo_path: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            repo_path: repo_path.into(),
            diff: String::new(),
            files_touched: Vec::new(),
            file_contents: BTreeMap::new(),
            findings: Vec::new(),
            retrieved_memory: Vec::new(),
            patch: None,
            test_result: None,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            success: false,
            error: None,
        }
    }

    /// Merges a partial update, overwriting only the fields it sets.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            diff,
            files_touched,
            file_contents,
            findings,
            retrieved_memory,
            patch,
            test_result,
            attempt,
            success,
            error,
        } = update;

        if let Some(diff) = diff {
            self.diff = diff;
        }
        if let Some(files_touched) = files_touched {
            self.files_touched = files_touched;
        }
        if let Some(file_contents) = file_contents {
            self.file_contents = file_contents;
        }
        if let Some(findings) = findings {
            self.findings = findings;
        }
        if let Some(retrieved_memory) = retrieved_memory {
            self.retrieved_memory = retrieved_memory;
        }
        if let Some(patch) = patch {
            self.patch = patch;
        }
        if let Some(test_result) = test_result {
            self.test_result = test_result;
        }
        if let Some(attempt) = attempt {
            debug_assert!(attempt >= self.attempt, "attempt must never decrease");
            self.attempt = attempt.max(self.attempt);
        }
        if let Some(success) = success {
            self.success = success;
        }
        if let Some(error) = error {
            self.error = error;
        }
    }

    /// Output of the last test run, if that run failed.
    pub fn prior_failure(&self) -> Option<&str> {
        self.test_result
            .as_ref()
            .filter(|result| !result.passed)
            .map(|result| result.output.as_str())
    }

    /// Final path component of the repository, used to label learnings.
    pub fn repo_name(&self) -> String {
        repo_name(&self.repo_path)
    }
}

fn repo_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Partial write-delta produced by a step.
///
/// Nullable fields use `Option<Option<T>>`: the outer `None` leaves the field
/// alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateUpdate {
    pub diff: Option<String>,
    pub files_touched: Option<Vec<String>>,
    pub file_contents: Option<BTreeMap<String, String>>,
    pub findings: Option<Vec<Finding>>,
    pub retrieved_memory: Option<Vec<String>>,
    pub patch: Option<Option<String>>,
    pub test_result: Option<Option<TestResult>>,
    pub attempt: Option<u32>,
    pub success: Option<bool>,
    pub error: Option<Option<String>>,
}

impl StateUpdate {
    /// An update that changes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// An update recording a fatal, non-retryable error.
    pub fn fatal(error: impl fmt::Display) -> Self {
        Self {
            error: Some(Some(error.to_string())),
            ..Self::default()
        }
    }

    /// The retry transition: bump the attempt counter, keep everything else.
    pub fn retry(state: &RunState) -> Self {
        Self {
            attempt: Some(state.attempt + 1),
            ..Self::default()
        }
    }
}
