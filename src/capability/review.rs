//! Gemini-backed reviewer.
//!
//! The model is asked for a bare JSON array of findings; the response is
//! parsed and validated here so nothing downstream sees free text.

use async_trait::async_trait;
use std::fmt::Write;
use tracing::{debug, info};

use super::{GeminiClient, ReviewContext, Reviewer};
use crate::diff::strip_code_fences;
use crate::error::CapabilityError;
use crate::state::Finding;

const STAGE: &str = "review";

/// Reviewer that prompts a Gemini model.
pub(crate) struct LlmReviewer {
    client: GeminiClient,
    temperature: f32,
}

impl LlmReviewer {
    pub fn new(client: GeminiClient, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }
}

#[async_trait]
impl Reviewer for LlmReviewer {
    async fn review(&self, context: ReviewContext<'_>) -> Result<Vec<Finding>, CapabilityError> {
        let prompt = build_prompt(context);
        debug!("Review prompt: {} bytes", prompt.len());

        let raw = self
            .client
            .generate(&prompt, self.temperature)
            .await
            .map_err(|e| CapabilityError::generation(STAGE, format!("{e:#}")))?;

        let findings = parse_findings(&raw)?;
        info!("Reviewer returned {} finding(s)", findings.len());
        Ok(findings)
    }
}

fn build_prompt(context: ReviewContext<'_>) -> String {
    let mut prompt = String::from(
        "You are reviewing a pending change before it is committed. \
         Report concrete, actionable problems only.\n",
    );

    if !context.memory.is_empty() {
        prompt.push_str("\n## Learnings from earlier reviews\n");
        for memory in context.memory {
            let _ = writeln!(prompt, "- {memory}");
        }
    }

    if let Some(failure) = context.prior_failure {
        prompt.push_str("\n## Tests failed after the previous fix\n");
        let _ = writeln!(prompt, "```\n{}\n```", failure.trim());
        prompt.push_str("Take this failure into account.\n");
    }

    let _ = write!(prompt, "\n## Diff\n```diff\n{}\n```\n", context.diff.trim_end());

    for (path, content) in context.files {
        let _ = write!(prompt, "\n## File: {path}\n```\n{}\n```\n", content.trim_end());
    }

    prompt.push_str(
        "\nLook for bugs, security problems, performance problems, missing error \
         handling, style violations, and breaking changes.\n\
         \n\
         Respond with ONLY a JSON array, no prose and no code fences:\n\
         [{\"file\": \"path/as/in/diff\", \"severity\": \"low\" | \"medium\" | \"high\", \
         \"issue\": \"what is wrong\", \"suggestion\": \"how to fix it\"}]\n\
         Respond with [] if there is nothing to fix.\n",
    );

    prompt
}

/// Parses the model's response into findings.
///
/// Tolerates code fences and text around the array, including bracketed
/// prose before it: each `[` is tried in turn and the first one that starts
/// a valid array of findings wins. Anything else is `MalformedOutput`.
pub(crate) fn parse_findings(raw: &str) -> Result<Vec<Finding>, CapabilityError> {
    let cleaned = strip_code_fences(raw);

    let mut first_error = None;
    let mut parsed = None;
    for (start, _) in cleaned.match_indices('[') {
        let mut stream =
            serde_json::Deserializer::from_str(&cleaned[start..]).into_iter::<Vec<Finding>>();
        match stream.next() {
            Some(Ok(findings)) => {
                parsed = Some(findings);
                break;
            }
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => {}
        }
    }

    let findings = match (parsed, first_error) {
        (Some(findings), _) => findings,
        (None, Some(e)) => {
            return Err(CapabilityError::malformed(
                STAGE,
                format!("invalid findings JSON: {e}"),
            ))
        }
        (None, None) => {
            return Err(CapabilityError::malformed(
                STAGE,
                "response contains no JSON array",
            ))
        }
    };

    if let Some(bad) = findings.iter().find(|f| f.file.trim().is_empty()) {
        return Err(CapabilityError::malformed(
            STAGE,
            format!("finding without a file: {}", bad.issue),
        ));
    }

    Ok(findings)
}
