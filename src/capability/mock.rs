//! Mock capabilities for testing.
//!
//! Each mock returns scripted responses and counts invocations so
//! orchestration tests can assert which steps ran. Responses are consumed in
//! order; once a script runs out, its last response repeats.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    BestEffort, FixContext, FixGenerator, MemoryEntry, MemoryStore, ReviewContext, Reviewer,
    TestRunner, VersionControl,
};
use crate::error::CapabilityError;
use crate::state::{Finding, TestResult};

/// Shared invocation counter.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counter(Arc<AtomicUsize>);

impl Counter {
    /// Increments and returns the previous count.
    fn tick(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

fn scripted<T: Clone>(script: &[T], index: usize) -> T {
    script[index.min(script.len() - 1)].clone()
}

/// Version control over an in-memory file map.
#[derive(Debug, Clone)]
pub(crate) struct MockVersionControl {
    diff: Result<String, CapabilityError>,
    files: Arc<Mutex<BTreeMap<String, String>>>,
    apply_results: Arc<Vec<Result<(), CapabilityError>>>,
    /// File contents written by every successful `apply_patch`.
    patched: Arc<Vec<(String, String)>>,
    /// Patches passed to `apply_patch`, in order.
    pub applied: Arc<Mutex<Vec<String>>>,
    pub read_diff_calls: Counter,
    pub read_file_calls: Counter,
    pub apply_calls: Counter,
}

impl MockVersionControl {
    pub fn new(diff: &str, files: &[(&str, &str)]) -> Self {
        Self {
            diff: Ok(diff.to_string()),
            files: Arc::new(Mutex::new(
                files
                    .iter()
                    .map(|(path, content)| ((*path).to_string(), (*content).to_string()))
                    .collect(),
            )),
            apply_results: Arc::new(vec![Ok(())]),
            patched: Arc::new(Vec::new()),
            applied: Arc::new(Mutex::new(Vec::new())),
            read_diff_calls: Counter::default(),
            read_file_calls: Counter::default(),
            apply_calls: Counter::default(),
        }
    }

    /// A working tree with nothing to review.
    pub fn clean() -> Self {
        Self {
            diff: Err(CapabilityError::NoChanges),
            ..Self::new("", &[])
        }
    }

    /// Script the outcome of successive `apply_patch` calls.
    pub fn with_apply_results(mut self, results: Vec<Result<(), CapabilityError>>) -> Self {
        self.apply_results = Arc::new(results);
        self
    }

    /// Files a successful `apply_patch` rewrites, as a real patch would.
    pub fn with_patched_files(mut self, files: &[(&str, &str)]) -> Self {
        self.patched = Arc::new(
            files
                .iter()
                .map(|(path, content)| ((*path).to_string(), (*content).to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl VersionControl for MockVersionControl {
    async fn read_diff(&self, _repo: &Path) -> Result<String, CapabilityError> {
        self.read_diff_calls.tick();
        self.diff.clone()
    }

    async fn read_file(&self, _repo: &Path, relative: &str) -> Result<String, CapabilityError> {
        self.read_file_calls.tick();
        self.files
            .lock()
            .unwrap()
            .get(relative)
            .cloned()
            .ok_or_else(|| CapabilityError::not_found(relative))
    }

    async fn apply_patch(&self, _repo: &Path, patch: &str) -> Result<(), CapabilityError> {
        let call = self.apply_calls.tick();
        self.applied.lock().unwrap().push(patch.to_string());
        let result = scripted(&self.apply_results, call);
        if result.is_ok() {
            let mut files = self.files.lock().unwrap();
            for (path, content) in self.patched.iter() {
                files.insert(path.clone(), content.clone());
            }
        }
        result
    }
}

/// Test runner returning scripted results.
#[derive(Debug, Clone)]
pub(crate) struct MockTestRunner {
    results: Arc<Vec<TestResult>>,
    pub calls: Counter,
}

impl MockTestRunner {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self {
            results: Arc::new(results),
            calls: Counter::default(),
        }
    }

    pub fn always_pass() -> Self {
        Self::new(vec![TestResult::passed("all tests passed")])
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    fn describe(&self) -> String {
        "mock test".to_string()
    }

    async fn run(&self, _repo: &Path) -> TestResult {
        let call = self.calls.tick();
        scripted(&self.results, call)
    }
}

/// Reviewer returning scripted findings and recording what it was shown.
#[derive(Debug, Clone)]
pub(crate) struct MockReviewer {
    responses: Arc<Vec<Result<Vec<Finding>, CapabilityError>>>,
    /// Prior-failure text seen on each call.
    pub seen_failures: Arc<Mutex<Vec<Option<String>>>>,
    /// Files seen on each call.
    pub seen_files: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
    pub calls: Counter,
}

impl MockReviewer {
    pub fn new(responses: Vec<Result<Vec<Finding>, CapabilityError>>) -> Self {
        Self {
            responses: Arc::new(responses),
            seen_failures: Arc::new(Mutex::new(Vec::new())),
            seen_files: Arc::new(Mutex::new(Vec::new())),
            calls: Counter::default(),
        }
    }

    pub fn always(findings: Vec<Finding>) -> Self {
        Self::new(vec![Ok(findings)])
    }
}

#[async_trait]
impl Reviewer for MockReviewer {
    async fn review(&self, context: ReviewContext<'_>) -> Result<Vec<Finding>, CapabilityError> {
        let call = self.calls.tick();
        self.seen_failures
            .lock()
            .unwrap()
            .push(context.prior_failure.map(String::from));
        self.seen_files.lock().unwrap().push(context.files.clone());
        scripted(&self.responses, call)
    }
}

/// Fix generator returning scripted raw output.
#[derive(Debug, Clone)]
pub(crate) struct MockFixGenerator {
    responses: Arc<Vec<Result<Option<String>, CapabilityError>>>,
    /// Files offered as context on each call.
    pub seen_files: Arc<Mutex<Vec<Vec<String>>>>,
    pub calls: Counter,
}

impl MockFixGenerator {
    pub fn new(responses: Vec<Result<Option<String>, CapabilityError>>) -> Self {
        Self {
            responses: Arc::new(responses),
            seen_files: Arc::new(Mutex::new(Vec::new())),
            calls: Counter::default(),
        }
    }

    pub fn patches(patches: &[&str]) -> Self {
        Self::new(patches.iter().map(|p| Ok(Some((*p).to_string()))).collect())
    }
}

#[async_trait]
impl FixGenerator for MockFixGenerator {
    async fn generate(&self, context: FixContext<'_>) -> Result<Option<String>, CapabilityError> {
        let call = self.calls.tick();
        self.seen_files
            .lock()
            .unwrap()
            .push(context.files.keys().map(|k| (*k).to_string()).collect());
        scripted(&self.responses, call)
    }
}

/// In-memory memory store.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockMemory {
    recall: Vec<String>,
    offline: bool,
    pub queries: Arc<Mutex<Vec<String>>>,
    pub stored: Arc<Mutex<Vec<MemoryEntry>>>,
}

impl MockMemory {
    pub fn with_recall(recall: &[&str]) -> Self {
        Self {
            recall: recall.iter().map(|s| (*s).to_string()).collect(),
            ..Self::default()
        }
    }

    /// A store whose every call degrades.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MemoryStore for MockMemory {
    async fn query(&self, query: &str, top_k: usize) -> BestEffort<Vec<String>> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.offline {
            return BestEffort::degraded(Vec::new(), "memory offline");
        }
        BestEffort::Complete(self.recall.iter().take(top_k).cloned().collect())
    }

    async fn store(&self, entry: &MemoryEntry) -> BestEffort<()> {
        if self.offline {
            return BestEffort::degraded((), "memory offline");
        }
        self.stored.lock().unwrap().push(entry.clone());
        BestEffort::Complete(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_vcs_reads_files() {
        let vcs = MockVersionControl::new("diff", &[("a.rs", "fn a() {}")]);
        assert_eq!(vcs.read_file(Path::new("/r"), "a.rs").await.unwrap(), "fn a() {}");
        assert!(vcs.read_file(Path::new("/r"), "b.rs").await.is_err());
        assert_eq!(vcs.read_file_calls.get(), 2);
    }

    #[tokio::test]
    async fn test_mock_vcs_clean_tree() {
        let vcs = MockVersionControl::clean();
        assert!(vcs.read_diff(Path::new("/r")).await.unwrap_err().is_no_changes());
    }

    #[tokio::test]
    async fn test_scripted_results_repeat_last() {
        let runner = MockTestRunner::new(vec![
            TestResult::failed("first"),
            TestResult::passed("second"),
        ]);
        let repo = Path::new("/r");

        assert!(!runner.run(repo).await.passed);
        assert!(runner.run(repo).await.passed);
        assert!(runner.run(repo).await.passed);
        assert_eq!(runner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_mock_memory_offline_degrades() {
        let memory = MockMemory::offline();
        let (value, warning) = memory.query("q", 3).await.into_parts();
        assert!(value.is_empty());
        assert!(warning.is_some());
    }
}
