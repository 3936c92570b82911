//! Post-commit consistency validation and surgical revision.
//!
//! A lightweight pass re-reads a committed chapter against the bible and
//! the entity ledger. Minor issues are recorded; a critical issue earns a
//! single surgical revision whose prompt is "fix only these spans with
//! minimum edits". Nothing in this module ever blocks chapter delivery:
//! post-hoc fixes are an asymptotic improvement, not a correctness
//! boundary.

use super::{complete_structured, prompts, record_usage, word_count, PipelineError};
use crate::llm::{GenerationParams, LlmGateway};
use crate::storage::{chapters as chapter_store, entities as entity_store, DbPool};
use crate::story::{Bible, Chapter};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Severity of a consistency issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Critical,
}

/// One consistency issue found in a committed chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    /// character | world | plot.
    pub category: String,
    /// Whether it warrants a surgical fix.
    pub severity: Severity,
    /// What is wrong.
    pub description: String,
    /// The offending quote, when locatable.
    #[serde(default)]
    pub quote: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConsistency {
    #[serde(default)]
    issues: Vec<ConsistencyIssue>,
}

/// What happened to a chapter in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionOutcome {
    /// No issues found.
    Clean,
    /// Minor issues recorded; chapter untouched.
    MinorIssues(usize),
    /// Critical issues found and a surgical revision committed.
    Revised,
    /// Critical issues found but the revision failed; the original stands.
    RevisionFailed,
    /// The consistency check itself failed; nothing recorded.
    Skipped,
}

const CONSISTENCY_SYSTEM: &str = "You are a continuity checker for a serialized novel. You \
compare a chapter against established canon and flag contradictions. You respond with JSON only.";

fn consistency_prompt(bible: &Bible, canon: &str, chapter: &Chapter) -> String {
    format!(
        "{bible_card}\nESTABLISHED FACTS:\n{canon}\n\nCHAPTER {n}:\n{content}\n\n\
         Flag character, world, or plot inconsistencies. Severity is \"critical\" only for \
         contradictions a reader would notice (a misspelled protagonist name, a broken world \
         rule, an undone established event); everything else is \"minor\".\n\
         Respond with a JSON object {{\"issues\": [{{\"category\", \"severity\", \
         \"description\", \"quote\"}}]}}; an empty array means the chapter is clean.",
        bible_card = prompts::bible_card(bible),
        n = chapter.chapter_number,
        content = chapter.content,
    )
}

const REVISION_SYSTEM: &str = "You are a line editor making surgical fixes. You change only \
what is flagged, with the minimum possible edits, preserving voice, structure, and length. You \
respond with the full revised chapter text and nothing else.";

fn revision_prompt(chapter: &Chapter, issues: &[&ConsistencyIssue]) -> String {
    let issue_list = issues
        .iter()
        .map(|issue| {
            let quote = issue.quote.as_deref().unwrap_or("(no quote)");
            format!("- {}: {} [{quote}]", issue.category, issue.description)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "CHAPTER TEXT:\n{content}\n\nFIX ONLY THESE ISSUES:\n{issue_list}\n\n\
         Return the complete chapter with only the flagged spans changed.",
        content = chapter.content,
    )
}

/// Run the consistency check and, on critical issues, one surgical revision.
pub async fn validate_and_revise(
    db: &DbPool,
    validation: &LlmGateway,
    generation: &LlmGateway,
    user_id: &str,
    bible: &Bible,
    chapter: &Chapter,
) -> RevisionOutcome {
    let canon = match entity_store::entities_for_story(
        db,
        &chapter.story_id,
        chapter.chapter_number.saturating_sub(1),
    )
    .await
    {
        Ok(entities) => entities
            .iter()
            .map(|e| format!("- ({}, ch {}) {}", e.entity_name, e.chapter_number, e.fact))
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load entity canon, skipping consistency check");
            return RevisionOutcome::Skipped;
        }
    };

    let raw: Result<RawConsistency, PipelineError> = complete_structured(
        db,
        validation,
        user_id,
        "consistency_check",
        CONSISTENCY_SYSTEM,
        &consistency_prompt(bible, &canon, chapter),
        &GenerationParams {
            max_tokens: 2048,
            temperature: 0.0,
            system_prompt: None,
        },
        "object with array 'issues'",
    )
    .await;

    let issues = match raw {
        Ok(raw) => raw.issues,
        Err(e) => {
            tracing::warn!(
                chapter = chapter.chapter_number,
                error = %e,
                "consistency check failed, skipping"
            );
            return RevisionOutcome::Skipped;
        }
    };

    if issues.is_empty() {
        return RevisionOutcome::Clean;
    }

    let critical: Vec<&ConsistencyIssue> = issues
        .iter()
        .filter(|i| i.severity == Severity::Critical)
        .collect();
    if critical.is_empty() {
        tracing::info!(
            chapter = chapter.chapter_number,
            minor = issues.len(),
            "minor consistency issues recorded"
        );
        return RevisionOutcome::MinorIssues(issues.len());
    }

    tracing::info!(
        chapter = chapter.chapter_number,
        critical = critical.len(),
        "critical consistency issues, attempting surgical revision"
    );

    // One attempt, minimum edits; on any failure the original stands.
    let response = match generation
        .complete(
            REVISION_SYSTEM,
            &revision_prompt(chapter, &critical),
            &GenerationParams {
                max_tokens: 8192,
                temperature: 0.2,
                system_prompt: None,
            },
        )
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "surgical revision call failed, original chapter stands");
            return RevisionOutcome::RevisionFailed;
        }
    };
    record_usage(db, user_id, "surgical_revision", generation, &response, None).await;

    let revised = response.text.trim();
    if revised.is_empty() || word_count(revised) < chapter.word_count / 2 {
        tracing::warn!(
            chapter = chapter.chapter_number,
            "surgical revision came back implausibly short, original chapter stands"
        );
        return RevisionOutcome::RevisionFailed;
    }

    match chapter_store::update_chapter_content(
        db,
        &chapter.id,
        revised,
        word_count(revised),
        Utc::now(),
    )
    .await
    {
        Ok(()) => {
            tracing::info!(chapter = chapter.chapter_number, "surgical revision committed");
            RevisionOutcome::Revised
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to store surgical revision, original stands");
            RevisionOutcome::RevisionFailed
        }
    }
}
