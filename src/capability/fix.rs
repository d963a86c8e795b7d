//! Gemini-backed fix generator.

use async_trait::async_trait;
use std::fmt::Write;
use tracing::{debug, info};

use super::{FixContext, FixGenerator, GeminiClient};
use crate::diff::strip_code_fences;
use crate::error::CapabilityError;

const STAGE: &str = "fix";

/// Fix generator that prompts a Gemini model for a unified diff.
pub(crate) struct LlmFixGenerator {
    client: GeminiClient,
    temperature: f32,
}

impl LlmFixGenerator {
    pub fn new(client: GeminiClient, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }
}

#[async_trait]
impl FixGenerator for LlmFixGenerator {
    async fn generate(&self, context: FixContext<'_>) -> Result<Option<String>, CapabilityError> {
        let prompt = build_prompt(&context);
        debug!("Fix prompt: {} bytes", prompt.len());

        let raw = self
            .client
            .generate(&prompt, self.temperature)
            .await
            .map_err(|e| CapabilityError::generation(STAGE, format!("{e:#}")))?;

        let patch = strip_code_fences(&raw);
        if patch.is_empty() {
            info!("Fix generator returned no patch");
            return Ok(None);
        }

        info!("Fix generator returned {} line(s)", patch.lines().count());
        Ok(Some(patch))
    }
}

fn build_prompt(context: &FixContext<'_>) -> String {
    let mut prompt = String::from(
        "You are fixing review findings in a pending change. \
         Produce one unified diff that resolves every finding below.\n",
    );

    if !context.conventions.is_empty() {
        prompt.push_str("\n## Conventions to follow\n");
        for convention in context.conventions {
            let _ = writeln!(prompt, "- {convention}");
        }
    }

    if let Some(failure) = context.prior_failure {
        prompt.push_str("\n## Your previous fix broke the tests\n");
        let _ = writeln!(prompt, "```\n{}\n```", failure.trim());
        prompt.push_str("Take a different approach this time.\n");
    }

    prompt.push_str("\n## Findings\n");
    for (i, finding) in context.findings.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{}. [{}] {}\n   Issue: {}\n   Suggestion: {}",
            i + 1,
            finding.severity,
            finding.file,
            finding.issue,
            finding.suggestion
        );
    }

    for (path, content) in &context.files {
        let _ = write!(prompt, "\n## File: {path}\n```\n{}\n```\n", content.trim_end());
    }

    prompt.push_str(
        "\nRules:\n\
         - Output ONLY the diff: no prose, no code fences.\n\
         - Use `--- a/<path>` and `+++ b/<path>` headers and `@@` hunk headers with context lines.\n\
         - Only modify the files shown above.\n",
    );

    prompt
}
