//! Chapter generator: Pass 2 of the pipeline plus the regeneration loop.
//!
//! Assembles the generation prompt deterministically, invokes the model,
//! and gates the result through the prose scanner (hard), the constraint
//! validator (hard), and the quality review (soft). Hard failures under
//! the attempt budget regenerate with the failure reasons injected into
//! the next prompt; an exhausted budget commits the best attempt flagged.
//! That last branch is a deliberate liveness choice: the pipeline must
//! make progress.
//!
//! Per-attempt state machine:
//! `extracting -> generating -> validating -> {accepted, retrying, exhausted}`.

use super::constraints::{self, ChapterConstraints, ConstraintReport, Verdict};
use super::prose_scan::ProseScanner;
use super::quality::{self, QualityReview};
use super::{complete_structured, entities, prompts, record_usage, revision, word_count,
            PipelineError};
use crate::config::Config;
use crate::llm::factory::ModelSet;
use crate::llm::GenerationParams;
use crate::storage::ledgers::{self, Ledger};
use crate::storage::{chapters as chapter_store, DbPool};
use crate::story::{ArcOutline, Bible, Chapter, ChapterOutline, CheckpointFeedback, EditorBrief,
                   Story};
use chrono::Utc;
use serde::Deserialize;

/// Recent ledger entries fed into constraint extraction.
const LEDGER_CONTEXT_LIMIT: u32 = 5;

/// Everything a chapter build needs.
pub struct ChapterContext<'a> {
    /// The story being generated.
    pub story: &'a Story,
    /// Its bible.
    pub bible: &'a Bible,
    /// Its arc.
    pub arc: &'a ArcOutline,
    /// Which chapter to build.
    pub chapter_number: u32,
    /// Editor brief for the current batch, if corrections apply.
    pub brief: Option<&'a EditorBrief>,
    /// Committed checkpoint feedback history.
    pub feedback_history: &'a [CheckpointFeedback],
}

/// A chapter ready to commit.
pub struct BuiltChapter {
    /// The chapter row to insert.
    pub chapter: Chapter,
    /// True when the accepted branch was taken; false when the attempt
    /// budget ran out and the best attempt is committed flagged.
    pub accepted: bool,
}

struct AttemptResult {
    text: String,
    scan_passed: bool,
    report: Option<ConstraintReport>,
    review: Option<QualityReview>,
}

impl AttemptResult {
    fn verdict_passed(&self) -> bool {
        self.report
            .as_ref()
            .is_some_and(|r| r.verdict() == Verdict::Pass)
    }

    fn quality_score(&self) -> f64 {
        self.review.as_ref().map_or(0.0, |r| r.weighted_score)
    }

    /// Preference order for the exhausted branch: scan pass, then verdict
    /// pass, then quality score.
    fn beats(&self, other: &AttemptResult) -> bool {
        if self.scan_passed != other.scan_passed {
            return self.scan_passed;
        }
        if self.verdict_passed() != other.verdict_passed() {
            return self.verdict_passed();
        }
        self.quality_score() > other.quality_score()
    }
}

fn chapter_system_prompt(config: &Config) -> String {
    format!(
        "You are the author of a serialized twelve-chapter novel for a {} reader. You write \
         immersive, craft-forward prose and respond with the chapter text only: no title line, \
         no notes, no markdown.\n\n{}",
        config.generation.reading_level,
        prompts::CRAFT_RULES,
    )
}

#[allow(clippy::too_many_arguments)]
fn chapter_user_prompt(
    ctx: &ChapterContext<'_>,
    outline: &ChapterOutline,
    previous: &[Chapter],
    constraints: &ChapterConstraints,
    config: &Config,
    word_min: u32,
    word_max: u32,
    failure_feedback: &str,
) -> String {
    let revision = ctx.brief.and_then(|b| b.outline_for(ctx.chapter_number));
    let mut prompt = String::new();
    prompt.push_str(&prompts::bible_card(ctx.bible));
    prompt.push('\n');
    prompt.push_str(&prompts::outline_block(outline, revision));
    prompt.push('\n');
    prompt.push_str(&prompts::previous_chapters_block(
        previous,
        config.generation.hook_window,
    ));
    let corrections = prompts::corrections_xml(ctx.feedback_history);
    if !corrections.is_empty() {
        prompt.push('\n');
        prompt.push_str(&corrections);
        prompt.push('\n');
    }
    if let Some(brief) = ctx.brief {
        prompt.push_str(&format!(
            "\nVOICE TARGET (match this register):\n{}\n",
            brief.style_example
        ));
    }
    prompt.push('\n');
    prompt.push_str(&constraints.to_xml());
    prompt.push_str(&format!(
        "\n\nWrite chapter {n} now. Strict length: between {word_min} and {word_max} words.",
        n = ctx.chapter_number,
    ));
    if !failure_feedback.is_empty() {
        prompt.push_str(&format!(
            "\n\nYour previous attempt was rejected. Fix all of the following without \
             introducing new problems:\n{failure_feedback}"
        ));
    }
    prompt
}

/// Build (but do not commit) chapter N for a story.
///
/// The caller owns the durable commit so the chapter insert and the
/// progress transition stay in one transaction.
pub async fn build_chapter(
    db: &DbPool,
    models: &ModelSet,
    config: &Config,
    ctx: &ChapterContext<'_>,
) -> Result<BuiltChapter, PipelineError> {
    let outline = ctx.arc.chapter(ctx.chapter_number).ok_or_else(|| {
        PipelineError::stage(format!("arc has no outline for chapter {}", ctx.chapter_number))
    })?;

    // Gather context: committed chapters, their key events, recent ledgers.
    let previous =
        chapter_store::chapters_in_range(db, &ctx.story.id, 1, ctx.chapter_number.saturating_sub(1))
            .await?;
    let previous_key_events: Vec<(u32, Vec<String>)> = previous
        .iter()
        .map(|c| (c.chapter_number, c.key_events.clone()))
        .collect();
    let character_entries = ledgers::recent_entries(
        db,
        Ledger::Character,
        &ctx.story.id,
        LEDGER_CONTEXT_LIMIT,
    )
    .await?;
    let world_entries =
        ledgers::recent_entries(db, Ledger::World, &ctx.story.id, LEDGER_CONTEXT_LIMIT).await?;

    // Pass 1: extraction.
    tracing::debug!(chapter = ctx.chapter_number, state = "extracting", "chapter attempt");
    let extraction_ctx = constraints::ExtractionContext {
        outline,
        previous_key_events: &previous_key_events,
        character_entries: &character_entries,
        world_entries: &world_entries,
        world_rules: &ctx.bible.world_rules,
    };
    let chapter_constraints =
        constraints::extract_constraints(db, &models.extraction, &ctx.story.user_id, &extraction_ctx)
            .await?;

    let tolerance = outline.word_count_target * config.generation.word_tolerance_pct / 100;
    let word_min = outline.word_count_target.saturating_sub(tolerance);
    let word_max = outline.word_count_target + tolerance;

    let scanner = ProseScanner::new(config.scanner.clone());
    let max_attempts = config.generation.max_regenerations + 1;
    let mut failure_feedback = String::new();
    let mut best: Option<AttemptResult> = None;
    let mut accepted = false;
    let mut attempts_used = 0u32;

    for attempt in 1..=max_attempts {
        attempts_used = attempt;
        tracing::debug!(
            chapter = ctx.chapter_number,
            attempt = attempt,
            state = "generating",
            "chapter attempt"
        );

        let prompt = chapter_user_prompt(
            ctx,
            outline,
            &previous,
            &chapter_constraints,
            config,
            word_min,
            word_max,
            &failure_feedback,
        );
        let response = models
            .generation
            .complete(
                &chapter_system_prompt(config),
                &prompt,
                &GenerationParams {
                    max_tokens: 8192,
                    temperature: 0.9,
                    system_prompt: None,
                },
            )
            .await?;
        record_usage(db, &ctx.story.user_id, "chapter", &models.generation, &response, None).await;
        let text = response.text.trim().to_string();

        // Hard gate 1: the deterministic prose scanner and the word band.
        let scan = scanner.scan(&text);
        let words = word_count(&text);
        let mut hard_failures = Vec::new();
        if !scan.passed() {
            hard_failures.push(scan.summary());
        }
        if words < word_min || words > word_max {
            hard_failures.push(format!(
                "length {words} words, required between {word_min} and {word_max}"
            ));
        }
        if !hard_failures.is_empty() {
            let result = AttemptResult {
                text,
                scan_passed: false,
                report: None,
                review: None,
            };
            if best.as_ref().map_or(true, |b| result.beats(b)) {
                best = Some(result);
            }
            failure_feedback = hard_failures.join("\n");
            tracing::info!(
                chapter = ctx.chapter_number,
                attempt = attempt,
                state = "retrying",
                reason = "prose_scan",
                "chapter attempt rejected"
            );
            continue;
        }

        // Hard gate 2: Pass-3 constraint validation.
        tracing::debug!(
            chapter = ctx.chapter_number,
            attempt = attempt,
            state = "validating",
            "chapter attempt"
        );
        let report = constraints::validate_chapter(
            db,
            &models.validation,
            &ctx.story.user_id,
            &text,
            &chapter_constraints,
        )
        .await?;
        if report.verdict() == Verdict::Fail {
            failure_feedback = report.failure_summary(&chapter_constraints);
            let result = AttemptResult {
                text,
                scan_passed: true,
                report: Some(report),
                review: None,
            };
            if best.as_ref().map_or(true, |b| result.beats(b)) {
                best = Some(result);
            }
            tracing::info!(
                chapter = ctx.chapter_number,
                attempt = attempt,
                state = "retrying",
                reason = "constraint_validation",
                "chapter attempt rejected"
            );
            continue;
        }

        // Soft gate: rubric quality review.
        let review = quality::review_chapter(
            db,
            &models.validation,
            &ctx.story.user_id,
            &text,
            outline,
            &config.generation.reading_level,
            config.generation.quality_pass_threshold,
        )
        .await?;
        let quality_failed = !review.passed;
        let fix_summary = review.fix_summary();
        let result = AttemptResult {
            text,
            scan_passed: true,
            report: Some(report),
            review: Some(review),
        };
        if best.as_ref().map_or(true, |b| result.beats(b)) {
            best = Some(result);
        }

        if quality_failed && config.generation.regenerate_on_quality_fail && attempt < max_attempts
        {
            failure_feedback = fix_summary;
            tracing::info!(
                chapter = ctx.chapter_number,
                attempt = attempt,
                state = "retrying",
                reason = "quality_review",
                "chapter attempt below quality bar"
            );
            continue;
        }

        accepted = true;
        tracing::debug!(
            chapter = ctx.chapter_number,
            attempt = attempt,
            state = "accepted",
            "chapter attempt"
        );
        break;
    }

    let best = best.ok_or_else(|| PipelineError::stage("no chapter attempt produced"))?;
    if !accepted {
        tracing::warn!(
            chapter = ctx.chapter_number,
            attempts = attempts_used,
            state = "exhausted",
            "regeneration budget exhausted, committing best attempt flagged"
        );
    }

    let summary = summarize_chapter(db, models, &ctx.story.user_id, outline, &best.text).await;
    let now = Utc::now();
    let word_count = word_count(&best.text);
    let quality_score = best.review.as_ref().map(|r| r.weighted_score);
    let chapter = Chapter {
        id: uuid::Uuid::new_v4().to_string(),
        story_id: ctx.story.id.clone(),
        chapter_number: ctx.chapter_number,
        title: outline.title.clone(),
        content: best.text,
        word_count,
        quality_score,
        regeneration_count: attempts_used.saturating_sub(1),
        quality_review: best
            .review
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .unwrap_or(None),
        constraint_report: best
            .report
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .unwrap_or(None),
        opening_hook: summary.opening_hook,
        closing_hook: summary.closing_hook,
        key_events: summary.key_events,
        flagged: !accepted,
        created_at: now,
        revised_at: None,
    };

    Ok(BuiltChapter { chapter, accepted })
}

#[derive(Debug, Deserialize)]
struct ChapterSummaryExtract {
    opening_hook: String,
    closing_hook: String,
    key_events: Vec<String>,
}

const SUMMARY_SYSTEM: &str = "You compress chapters into continuity notes for later chapters. \
You respond with JSON only.";

/// Extract hooks and key events for the committed-chapter recap.
///
/// Falls back to deterministic first/last sentences and the outline's
/// events summary when the model call fails; the recap must always exist
/// because chapter N+1's prompt depends on it.
async fn summarize_chapter(
    db: &DbPool,
    models: &ModelSet,
    user_id: &str,
    outline: &ChapterOutline,
    text: &str,
) -> ChapterSummaryExtract {
    let prompt = format!(
        "CHAPTER TEXT:\n{text}\n\nRespond with a JSON object {{\"opening_hook\": \"first \
         sentence or two\", \"closing_hook\": \"final sentence or two\", \"key_events\": \
         [\"3-6 events later chapters must not contradict\"]}}."
    );
    let extracted: Result<ChapterSummaryExtract, PipelineError> = complete_structured(
        db,
        &models.extraction,
        user_id,
        "chapter_summary",
        SUMMARY_SYSTEM,
        &prompt,
        &GenerationParams {
            max_tokens: 1024,
            temperature: 0.0,
            system_prompt: None,
        },
        "object with opening_hook, closing_hook, key_events",
    )
    .await;

    match extracted {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!(error = %e, "chapter summary extraction failed, using fallback");
            ChapterSummaryExtract {
                opening_hook: first_sentence(text),
                closing_hook: last_sentence(text),
                key_events: vec![outline.events_summary.clone()],
            }
        }
    }
}

fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find(['.', '!', '?']) {
        Some(idx) => trimmed[..=idx].to_string(),
        None => trimmed.chars().take(200).collect(),
    }
}

fn last_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let without_terminal = trimmed.trim_end_matches(['.', '!', '?']);
    match without_terminal.rfind(['.', '!', '?']) {
        Some(idx) => trimmed[idx + 1..].trim().to_string(),
        None => {
            let tail: Vec<char> = trimmed.chars().collect();
            tail[tail.len().saturating_sub(200)..].iter().collect()
        }
    }
}

/// Post-commit passes: entity extraction plus consistency validation and
/// surgical revision. Both are non-fatal by design.
pub async fn run_post_commit(
    db: &DbPool,
    models: &ModelSet,
    user_id: &str,
    bible: &Bible,
    chapter: &Chapter,
) {
    entities::extract_and_record(db, &models.extraction, user_id, chapter).await;
    let outcome = revision::validate_and_revise(
        db,
        &models.validation,
        &models.generation,
        user_id,
        bible,
        chapter,
    )
    .await;
    tracing::debug!(
        chapter = chapter.chapter_number,
        outcome = ?outcome,
        "post-commit passes done"
    );
}
