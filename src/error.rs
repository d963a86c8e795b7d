//! Domain-specific error types for capability calls.
//!
//! Typed errors let the orchestrator tell a fatal "nothing to review" apart
//! from a malformed generation or a patch that does not apply, without
//! parsing error message strings.

/// Errors returned by the fallible capability ports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum CapabilityError {
    /// The working tree has no differences from its last commit.
    #[error("No changes to review: the working tree matches HEAD")]
    NoChanges,

    /// A file could not be found (or read) in the working tree.
    #[error("File not found: {path}")]
    NotFound { path: String },

    /// The patch could not be applied to the working tree.
    #[error("Failed to apply patch: {message}")]
    ApplyFailed { message: String },

    /// A generation step returned output that failed validation.
    #[error("Malformed {stage} output: {message}")]
    MalformedOutput { stage: &'static str, message: String },

    /// A generation step failed before producing any output.
    #[error("{stage} generation failed: {message}")]
    Generation { stage: &'static str, message: String },

    /// An external command could not be run or exited unsuccessfully.
    #[error("Command failed: {message}")]
    Command { message: String },
}

impl CapabilityError {
    /// Creates a `NotFound` error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates an `ApplyFailed` error.
    pub fn apply_failed(message: impl Into<String>) -> Self {
        Self::ApplyFailed {
            message: message.into(),
        }
    }

    /// Creates a `MalformedOutput` error for the given stage.
    pub fn malformed(stage: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            stage,
            message: message.into(),
        }
    }

    /// Creates a `Generation` error for the given stage.
    pub fn generation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Generation {
            stage,
            message: message.into(),
        }
    }

    /// Creates a `Command` error.
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Returns true if the working tree had nothing to review.
    pub fn is_no_changes(&self) -> bool {
        matches!(self, Self::NoChanges)
    }

    /// Returns true if generated output failed validation.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedOutput { .. })
    }
}
