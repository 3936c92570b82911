//! Rubric-based quality review.
//!
//! Six weighted criteria, each scored 1-10 with evidence. The weighted
//! score is computed here from the per-criterion scores rather than
//! trusted from the model; PASS is a configured threshold.

use super::{complete_structured, PipelineError};
use crate::llm::{GenerationParams, LlmGateway};
use crate::storage::DbPool;
use crate::story::ChapterOutline;
use serde::{Deserialize, Serialize};

/// The rubric: criterion name and weight. Weights sum to 1.0.
pub const RUBRIC: [(&str, f64); 6] = [
    ("show_dont_tell", 0.25),
    ("dialogue", 0.20),
    ("pacing", 0.20),
    ("age_appropriateness", 0.15),
    ("character_consistency", 0.10),
    ("prose_quality", 0.10),
];

/// Score a criterion falls back to when the model omits it.
const MISSING_CRITERION_SCORE: f64 = 5.0;

/// Per-criterion score below which a suggested fix is expected.
const FIX_THRESHOLD: f64 = 6.0;

/// One scored criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Criterion name, one of the rubric names.
    pub name: String,
    /// 1-10.
    pub score: f64,
    /// Evidence quote supporting the score.
    #[serde(default)]
    pub evidence: String,
    /// Suggested fix when the score is low.
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

/// The full review of one chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReview {
    /// Per-criterion scores.
    pub criteria: Vec<CriterionScore>,
    /// Weighted score, computed from the rubric.
    pub weighted_score: f64,
    /// Whether the weighted score met the pass threshold.
    pub passed: bool,
}

impl QualityReview {
    /// Suggested fixes for the regeneration prompt, low scores first.
    pub fn fix_summary(&self) -> String {
        let mut low: Vec<&CriterionScore> = self
            .criteria
            .iter()
            .filter(|c| c.score < FIX_THRESHOLD)
            .collect();
        low.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        low.iter()
            .map(|c| {
                let fix = c.suggested_fix.as_deref().unwrap_or("raise this score");
                format!("{} scored {:.1}: {fix}", c.name, c.score)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Compute the weighted score over the rubric.
///
/// A criterion the model failed to score contributes
/// [`MISSING_CRITERION_SCORE`].
pub fn weighted_score(criteria: &[CriterionScore]) -> f64 {
    RUBRIC
        .iter()
        .map(|(name, weight)| {
            let score = criteria
                .iter()
                .find(|c| c.name == *name)
                .map_or(MISSING_CRITERION_SCORE, |c| c.score.clamp(1.0, 10.0));
            score * weight
        })
        .sum()
}

#[derive(Debug, Deserialize)]
struct RawReview {
    criteria: Vec<CriterionScore>,
}

const REVIEW_SYSTEM: &str = "You are a demanding fiction editor reviewing a serialized novel \
chapter for a discerning reader. You respond with JSON only.";

fn review_prompt(chapter_text: &str, outline: &ChapterOutline, reading_level: &str) -> String {
    let criteria_list = RUBRIC
        .iter()
        .map(|(name, weight)| format!("- {name} (weight {weight})"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Review this chapter against its outline for a {reading_level} reader.\n\n\
         OUTLINE:\n{outline}\n\nCHAPTER:\n{chapter_text}\n\n\
         Score each criterion 1-10 with a short evidence quote. If a criterion scores below 6, \
         include a concrete suggested_fix.\n\
         Criteria:\n{criteria_list}\n\n\
         Respond with a JSON object {{\"criteria\": [{{\"name\", \"score\", \"evidence\", \
         \"suggested_fix\"}}]}}.",
        outline = super::prompts::outline_block(outline, None),
    )
}

/// Run the rubric review over a generated chapter.
pub async fn review_chapter(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    chapter_text: &str,
    outline: &ChapterOutline,
    reading_level: &str,
    pass_threshold: f64,
) -> Result<QualityReview, PipelineError> {
    let raw: RawReview = complete_structured(
        db,
        gateway,
        user_id,
        "quality_review",
        REVIEW_SYSTEM,
        &review_prompt(chapter_text, outline, reading_level),
        &GenerationParams {
            max_tokens: 2048,
            temperature: 0.0,
            system_prompt: None,
        },
        "object with array 'criteria' of {name, score, evidence, suggested_fix}",
    )
    .await?;

    let score = weighted_score(&raw.criteria);
    let review = QualityReview {
        criteria: raw.criteria,
        weighted_score: score,
        passed: score >= pass_threshold,
    };
    tracing::debug!(
        chapter = outline.chapter_number,
        score = review.weighted_score,
        passed = review.passed,
        "quality review complete"
    );
    Ok(review)
}
