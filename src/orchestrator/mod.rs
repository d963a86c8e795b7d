//! Review/fix/test orchestration.
//!
//! One run walks `Initialize → Review → Fix → ApplyPatch → Test → Route`.
//! `Route` is the only branch: it either ends the run or loops back to
//! `Review` with the attempt counter bumped. Steps read the [`RunState`] and
//! return a [`StateUpdate`]; only [`Orchestrator::run`] mutates the state.
//!
//! - `format`: output formatting and progress display

mod format;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::{
    FixContext, FixGenerator, MemoryEntry, MemoryStore, ReviewContext, Reviewer, TestRunner,
    VersionControl,
};
use crate::diff::{extract_files_from_diff, validate_patch};
use crate::error::CapabilityError;
use crate::state::{RunState, StateUpdate};

use format::{
    excerpt, format_attempt_header, format_banner, format_final_report, format_findings,
    format_initialized, format_patch_summary, format_retry, format_step, format_test_outcome,
    FAILURE_EXCERPT_CHARS,
};

/// Diagnostic used when a run fails without a more specific one.
pub(crate) const UNKNOWN_ERROR: &str = "unknown error";

/// Named steps of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Initialize,
    Review,
    Fix,
    ApplyPatch,
    Test,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialize => write!(f, "Initialize"),
            Self::Review => write!(f, "Review"),
            Self::Fix => write!(f, "Fix"),
            Self::ApplyPatch => write!(f, "Apply patch"),
            Self::Test => write!(f, "Test"),
        }
    }
}

/// Decision taken after each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Success,
    Retry,
    Failure,
}

/// Decides what follows an attempt. Pure: the same state always routes the same way.
pub(crate) fn route(state: &RunState) -> Route {
    if state.error.is_some() {
        return Route::Failure;
    }
    if state.patch.is_none() {
        return Route::Success;
    }
    match state.test_result {
        Some(ref result) if result.passed => Route::Success,
        Some(_) if state.attempt < state.max_attempts => Route::Retry,
        _ => Route::Failure,
    }
}

/// The most specific diagnostic available for a failed run.
fn failure_diagnostic(state: &RunState) -> String {
    state
        .error
        .clone()
        .or_else(|| state.test_result.as_ref().map(|r| r.output.clone()))
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

/// Query text used to recall memories for a review pass.
fn memory_query(files: &[String], prior_failure: Option<&str>) -> String {
    let mut query = format!("Reviewing changes in files: {}", files.join(", "));
    if let Some(failure) = prior_failure {
        query.push_str("\nPrevious test failure: ");
        query.push_str(&excerpt(failure.trim(), FAILURE_EXCERPT_CHARS));
    }
    query
}

/// Capabilities a run depends on, constructed once at startup.
pub(crate) struct Capabilities {
    pub vcs: Box<dyn VersionControl>,
    pub tests: Box<dyn TestRunner>,
    pub reviewer: Box<dyn Reviewer>,
    pub fixer: Box<dyn FixGenerator>,
    pub memory: Box<dyn MemoryStore>,
}

/// Drives one review/fix/test run over a working tree.
pub(crate) struct Orchestrator {
    caps: Capabilities,
    memory_top_k: usize,
}

impl Orchestrator {
    pub fn new(caps: Capabilities, memory_top_k: usize) -> Self {
        Self { caps, memory_top_k }
    }

    /// Runs to a terminal state and returns the final state.
    ///
    /// The run terminates after at most `max_attempts` review/fix/test passes.
    pub async fn run(&self, repo_path: &Path, max_attempts: u32) -> RunState {
        let started = Instant::now();
        let mut state = RunState::new(repo_path, max_attempts);

        print!(
            "{}",
            format_banner(&state.repo_path, state.max_attempts, &self.caps.tests.describe())
        );
        tracing::info!(
            event = "run_start",
            repo = %state.repo_path.display(),
            max_attempts = state.max_attempts
        );

        announce(Step::Initialize, &state);
        match self.initialize(&state).await {
            Ok(update) => state.apply(update),
            Err(e) => {
                if e.is_no_changes() {
                    info!("Nothing to review in {}", state.repo_path.display());
                } else {
                    warn!("Initialization failed: {}", e);
                }
                // Nothing to retry: no attempt has started
                state.apply(StateUpdate::fatal(e));
                Self::fail(&mut state);
                print!("{}", format_final_report(&state, started.elapsed()));
                return state;
            }
        }

        loop {
            println!("{}", format_attempt_header(state.attempt, state.max_attempts));
            tracing::info!(event = "attempt_start", attempt = state.attempt);

            self.run_attempt(&mut state).await;

            let next = route(&state);
            tracing::info!(event = "route", attempt = state.attempt, route = ?next);
            match next {
                Route::Retry => {
                    println!("{}", format_retry(state.attempt, state.max_attempts));
                    state.apply(StateUpdate::retry(&state));
                }
                Route::Success => {
                    self.succeed(&mut state).await;
                    break;
                }
                Route::Failure => {
                    Self::fail(&mut state);
                    break;
                }
            }
        }

        tracing::info!(
            event = "run_end",
            success = state.success,
            attempts = state.attempt,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
        );
        print!("{}", format_final_report(&state, started.elapsed()));

        state
    }

    /// One pass of Review → Fix → ApplyPatch → Test. Stops early on a fatal
    /// error, and skips ApplyPatch/Test when there is no patch.
    async fn run_attempt(&self, state: &mut RunState) {
        announce(Step::Review, state);
        let update = self.review(state).await;
        state.apply(update);
        if state.error.is_some() {
            return;
        }

        announce(Step::Fix, state);
        let update = self.fix(state).await;
        state.apply(update);
        if state.error.is_some() || state.patch.is_none() {
            return;
        }

        announce(Step::ApplyPatch, state);
        let update = self.apply_patch(state).await;
        state.apply(update);
        if state.error.is_some() {
            return;
        }

        announce(Step::Test, state);
        let update = self.test(state).await;
        state.apply(update);
    }

    async fn initialize(&self, state: &RunState) -> Result<StateUpdate, CapabilityError> {
        let diff = self.caps.vcs.read_diff(&state.repo_path).await?;
        if diff.trim().is_empty() {
            return Err(CapabilityError::NoChanges);
        }

        let files_touched = extract_files_from_diff(&diff);
        let file_contents = self.load_files(&state.repo_path, &files_touched).await;
        println!(
            "{}",
            format_initialized(&diff, &files_touched, file_contents.len())
        );

        Ok(StateUpdate {
            diff: Some(diff),
            files_touched: Some(files_touched),
            file_contents: Some(file_contents),
            ..StateUpdate::default()
        })
    }

    /// Loads every file that exists; missing ones are skipped with a warning.
    async fn load_files(&self, repo: &Path, files: &[String]) -> BTreeMap<String, String> {
        let mut contents = BTreeMap::new();
        for file in files {
            match self.caps.vcs.read_file(repo, file).await {
                Ok(content) => {
                    contents.insert(file.clone(), content);
                }
                Err(e) => warn!("Could not load {}: {}", file, e),
            }
        }
        contents
    }

    async fn review(&self, state: &RunState) -> StateUpdate {
        let prior_failure = state.prior_failure();
        let query = memory_query(&state.files_touched, prior_failure);

        let (memories, warning) = self
            .caps
            .memory
            .query(&query, self.memory_top_k)
            .await
            .into_parts();
        if let Some(warning) = warning {
            warn!(event = "memory_degraded", operation = "query", "{}", warning);
        }
        debug!("Recalled {} memories", memories.len());

        let context = ReviewContext {
            diff: &state.diff,
            files: &state.file_contents,
            memory: &memories,
            prior_failure,
        };

        match self.caps.reviewer.review(context).await {
            Ok(findings) => {
                println!("{}", format_findings(&findings));
                StateUpdate {
                    findings: Some(findings),
                    retrieved_memory: Some(memories),
                    ..StateUpdate::default()
                }
            }
            Err(e) => {
                warn!("Review failed: {}", e);
                StateUpdate::fatal(e)
            }
        }
    }

    async fn fix(&self, state: &RunState) -> StateUpdate {
        let no_patch = StateUpdate {
            patch: Some(None),
            ..StateUpdate::default()
        };

        if state.findings.is_empty() {
            println!("  No issues to fix");
            return no_patch;
        }

        let files: BTreeMap<&str, &str> = state
            .findings
            .iter()
            .filter_map(|finding| {
                state
                    .file_contents
                    .get_key_value(finding.file.as_str())
                    .map(|(path, content)| (path.as_str(), content.as_str()))
            })
            .collect();
        let allowed: BTreeSet<&str> = files.keys().copied().collect();

        let context = FixContext {
            findings: &state.findings,
            files,
            conventions: &state.retrieved_memory,
            prior_failure: state.prior_failure(),
        };

        let result = self
            .caps
            .fixer
            .generate(context)
            .await
            .and_then(|raw| raw.map(|text| validate_patch(&text, &allowed)).transpose());

        match result {
            Ok(Some(patch)) => {
                println!("{}", format_patch_summary(&patch));
                StateUpdate {
                    patch: Some(Some(patch)),
                    ..StateUpdate::default()
                }
            }
            Ok(None) => {
                println!("  Fix generator found nothing to change");
                no_patch
            }
            Err(e) => {
                if e.is_malformed() {
                    warn!("Rejected generated patch: {}", e);
                } else {
                    warn!("Fix generation failed: {}", e);
                }
                StateUpdate {
                    error: Some(Some(e.to_string())),
                    ..no_patch
                }
            }
        }
    }

    async fn apply_patch(&self, state: &RunState) -> StateUpdate {
        let Some(ref patch) = state.patch else {
            return StateUpdate::none();
        };

        match self.caps.vcs.apply_patch(&state.repo_path, patch).await {
            Ok(()) => {
                println!("  Patch applied");
                // Later attempts must see the tree as it now stands
                let refreshed = self
                    .load_files(&state.repo_path, &state.files_touched)
                    .await;
                StateUpdate {
                    file_contents: Some(refreshed),
                    ..StateUpdate::default()
                }
            }
            Err(e) => {
                warn!("{}", e);
                StateUpdate::fatal(e)
            }
        }
    }

    async fn test(&self, state: &RunState) -> StateUpdate {
        let result = self.caps.tests.run(&state.repo_path).await;
        println!("{}", format_test_outcome(&result));
        StateUpdate {
            test_result: Some(Some(result)),
            ..StateUpdate::default()
        }
    }

    /// Success terminal: record learnings (best-effort) and mark the run successful.
    async fn succeed(&self, state: &mut RunState) {
        if state.patch.is_some() {
            let repo = state.repo_name();
            let mut stored = 0usize;
            for finding in &state.findings {
                let entry = MemoryEntry::successful_fix(&repo, finding);
                match self.caps.memory.store(&entry).await.into_parts() {
                    ((), None) => stored += 1,
                    ((), Some(warning)) => {
                        warn!(event = "memory_degraded", operation = "store", "{}", warning);
                    }
                }
            }
            info!("Stored {}/{} learning(s)", stored, state.findings.len());
            println!("  Stored {stored} learning(s) to memory");
        }

        state.apply(StateUpdate {
            success: Some(true),
            ..StateUpdate::default()
        });
    }

    /// Failure terminal: pick the most specific diagnostic.
    fn fail(state: &mut RunState) {
        let diagnostic = failure_diagnostic(state);
        debug!("Run failed: {}", diagnostic);
        state.apply(StateUpdate {
            success: Some(false),
            error: Some(Some(diagnostic)),
            ..StateUpdate::default()
        });
    }
}

fn announce(step: Step, state: &RunState) {
    println!("{}", format_step(step));
    tracing::debug!(event = "step", step = %step, attempt = state.attempt);
}
