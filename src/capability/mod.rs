//! Capability ports the orchestrator drives.
//!
//! Each external collaborator sits behind a trait so the orchestration logic
//! can be exercised with scripted mocks:
//! - `VersionControl`: diff, file reads, patch application (`git`)
//! - `TestRunner`: the project's test command
//! - `Reviewer` / `FixGenerator`: text generation (Gemini)
//! - `MemoryStore`: similarity recall of past learnings (Pinecone)
//!
//! Capabilities are constructed once at startup and handed to the
//! orchestrator; there are no process-wide clients.

mod fix;
mod gemini;
mod git;
mod memory;
#[cfg(test)]
pub(crate) mod mock;
mod review;
mod test_runner;

pub(crate) use fix::LlmFixGenerator;
pub(crate) use gemini::GeminiClient;
pub(crate) use git::GitVersionControl;
pub(crate) use memory::PineconeMemory;
pub(crate) use review::LlmReviewer;
pub(crate) use test_runner::CommandTestRunner;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::CapabilityError;
use crate::state::{Finding, TestResult};

/// Reads and mutates the working tree.
#[async_trait]
pub(crate) trait VersionControl: Send + Sync {
    /// Returns the diff of the working tree against its last commit.
    ///
    /// Fails with [`CapabilityError::NoChanges`] when there is nothing to diff.
    async fn read_diff(&self, repo: &Path) -> Result<String, CapabilityError>;

    /// Reads a file relative to the repository root.
    async fn read_file(&self, repo: &Path, relative: &str) -> Result<String, CapabilityError>;

    /// Applies a unified diff. Either the whole patch lands or nothing does.
    async fn apply_patch(&self, repo: &Path, patch: &str) -> Result<(), CapabilityError>;
}

/// Runs the project's test suite.
#[async_trait]
pub(crate) trait TestRunner: Send + Sync {
    /// Short description of what gets run, for display.
    fn describe(&self) -> String;

    /// Runs the tests. Never fails: crashes and timeouts are failed results.
    async fn run(&self, repo: &Path) -> TestResult;
}

/// Everything the reviewer sees for one pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReviewContext<'a> {
    pub diff: &'a str,
    pub files: &'a BTreeMap<String, String>,
    pub memory: &'a [String],
    pub prior_failure: Option<&'a str>,
}

/// Produces findings for a change.
#[async_trait]
pub(crate) trait Reviewer: Send + Sync {
    /// Reviews the change. An empty list means "no issues".
    async fn review(&self, context: ReviewContext<'_>) -> Result<Vec<Finding>, CapabilityError>;
}

/// Everything the fix generator sees for one pass.
#[derive(Debug, Clone)]
pub(crate) struct FixContext<'a> {
    pub findings: &'a [Finding],
    /// Content of every file referenced by a finding and present on disk.
    pub files: BTreeMap<&'a str, &'a str>,
    pub conventions: &'a [String],
    pub prior_failure: Option<&'a str>,
}

/// Produces a patch resolving a set of findings.
#[async_trait]
pub(crate) trait FixGenerator: Send + Sync {
    /// Returns raw patch text, or `None` when no change is needed.
    ///
    /// The text is validated by the caller.
    async fn generate(&self, context: FixContext<'_>) -> Result<Option<String>, CapabilityError>;
}

/// Result of a best-effort call: either complete, or a fallback value plus
/// the reason the real one could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BestEffort<T> {
    Complete(T),
    Degraded { value: T, warning: String },
}

impl<T> BestEffort<T> {
    /// Creates a degraded result.
    pub fn degraded(value: T, warning: impl fmt::Display) -> Self {
        Self::Degraded {
            value,
            warning: warning.to_string(),
        }
    }

    /// Converts a fallible result, substituting `fallback` on error.
    pub fn from_result<E: fmt::Display>(result: Result<T, E>, fallback: T) -> Self {
        match result {
            Ok(value) => Self::Complete(value),
            Err(e) => Self::degraded(fallback, e),
        }
    }

    /// Splits into the value and an optional warning.
    pub fn into_parts(self) -> (T, Option<String>) {
        match self {
            Self::Complete(value) => (value, None),
            Self::Degraded { value, warning } => (value, Some(warning)),
        }
    }
}

/// What a stored memory describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)] // Other writers to the same index use these kinds
pub(crate) enum MemoryKind {
    RepoSummary,
    CodingConvention,
    SuccessfulFix,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RepoSummary => write!(f, "repo_summary"),
            Self::CodingConvention => write!(f, "coding_convention"),
            Self::SuccessfulFix => write!(f, "successful_fix"),
        }
    }
}

/// A learning to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MemoryEntry {
    pub kind: MemoryKind,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl MemoryEntry {
    /// A learning describing one finding that was fixed.
    pub fn successful_fix(repo: &str, finding: &Finding) -> Self {
        let content = format!(
            "In {repo}, fixed issue in {}: {}. Solution: {}",
            finding.file, finding.issue, finding.suggestion
        );
        let metadata = BTreeMap::from([
            ("repo".to_string(), repo.to_string()),
            ("file".to_string(), finding.file.clone()),
            ("severity".to_string(), finding.severity.to_string()),
        ]);
        Self {
            kind: MemoryKind::SuccessfulFix,
            content,
            metadata,
        }
    }
}

/// Long-term recall of textual learnings.
///
/// Both operations are best-effort: failures surface as
/// [`BestEffort::Degraded`], never as errors.
#[async_trait]
pub(crate) trait MemoryStore: Send + Sync {
    /// Returns up to `top_k` snippets relevant to `query`.
    async fn query(&self, query: &str, top_k: usize) -> BestEffort<Vec<String>>;

    /// Persists a learning.
    async fn store(&self, entry: &MemoryEntry) -> BestEffort<()>;
}
