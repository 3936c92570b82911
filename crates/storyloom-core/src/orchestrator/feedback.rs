//! Feedback ingest adapter.
//!
//! Normalizes incoming checkpoint feedback (legacy names included),
//! persists it, builds the editor brief for the upcoming batch, and kicks
//! the orchestrator into the next batch. Legacy stories whose batch
//! already exists advance without regenerating.

use super::queue::GenerationJob;
use crate::config::Config;
use crate::llm::factory::ModelSet;
use crate::pipeline::{editor_brief, PipelineError};
use crate::storage::{arcs, bibles, briefs, chapters, feedback as feedback_store, stories, DbPool};
use crate::story::{
    normalize_checkpoint, Checkpoint, CheckpointFeedback, FeedbackPayload, GenerationStep,
    StoryStatus,
};
use chrono::Utc;
use tokio::sync::mpsc;

/// What happened to an ingested feedback submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The canonical checkpoint the feedback was stored under.
    pub checkpoint: Checkpoint,
    /// Chapters now being generated (empty for record-only checkpoints).
    pub generating_chapters: Vec<u32>,
    /// True when the batch already existed and no generation was started.
    pub already_generated: bool,
}

/// Ingest one checkpoint feedback submission.
///
/// The batch triggered by checkpoint K begins only after this function has
/// committed the feedback row; the editor brief is persisted before the
/// batch is enqueued so a crash in between resumes without re-spending the
/// brief call.
pub async fn ingest_feedback(
    db: &DbPool,
    models: &ModelSet,
    config: &Config,
    queue_tx: &mpsc::Sender<GenerationJob>,
    user_id: &str,
    story_id: &str,
    raw_checkpoint: &str,
    payload: FeedbackPayload,
) -> Result<IngestOutcome, PipelineError> {
    let checkpoint = normalize_checkpoint(raw_checkpoint)
        .ok_or_else(|| PipelineError::stage(format!("unknown checkpoint '{raw_checkpoint}'")))?;

    let story = stories::get_story(db, story_id)
        .await?
        .ok_or_else(|| PipelineError::stage(format!("unknown story {story_id}")))?;

    // Presence invariant: chapter_N feedback implies chapters 1..=N+1 exist
    // (the batch that ends one past the checkpoint must be committed).
    if let Some((batch_start, _)) = checkpoint.batch() {
        let required = batch_start - 1;
        let committed = chapters::count_chapters_in_range(db, story_id, 1, required).await?;
        if committed < required {
            return Err(PipelineError::stage(format!(
                "feedback for {} requires chapters 1..{required}, only {committed} committed",
                checkpoint.as_tag()
            )));
        }
    }

    let feedback = CheckpointFeedback {
        user_id: user_id.to_string(),
        story_id: story_id.to_string(),
        checkpoint,
        payload,
        created_at: Utc::now(),
    };
    feedback_store::upsert_feedback(db, &feedback).await?;
    tracing::info!(
        story = story_id,
        checkpoint = checkpoint.as_tag(),
        raw = raw_checkpoint,
        "checkpoint feedback committed"
    );

    let Some((batch_start, batch_end)) = checkpoint.batch() else {
        // library_exit is record-only.
        return Ok(IngestOutcome {
            checkpoint,
            generating_chapters: vec![],
            already_generated: false,
        });
    };

    // Legacy stories: the batch may already exist; advance without
    // regenerating.
    let existing = chapters::count_chapters_in_range(db, story_id, batch_start, batch_end).await?;
    if existing == batch_end - batch_start + 1 {
        let next = GenerationStep::after_chapter(batch_end);
        let mut progress = story.progress.clone();
        let expected_step = progress.current_step.as_tag();
        progress.chapters_generated = progress.chapters_generated.max(batch_end);
        progress.advance(next, Utc::now());
        let status = if next == GenerationStep::Chapter12Complete {
            StoryStatus::Completed
        } else {
            StoryStatus::Active
        };
        let swapped = stories::update_progress_cas(
            db,
            story_id,
            &expected_step,
            story.updated_at,
            &progress,
            status,
        )
        .await?;
        if !swapped {
            return Err(PipelineError::LostRace {
                story_id: story_id.to_string(),
            });
        }
        tracing::info!(
            story = story_id,
            batch_start,
            batch_end,
            "batch already generated, advanced without regeneration"
        );
        return Ok(IngestOutcome {
            checkpoint,
            generating_chapters: vec![],
            already_generated: true,
        });
    }

    // Build and persist the editor brief before the batch starts.
    if briefs::get_brief(db, story_id, batch_start).await?.is_none() {
        let history = feedback_store::feedback_history(db, story_id).await?;
        let bible = bibles::get_bible(db, story_id).await?;
        let arc = arcs::get_current_arc(db, story_id).await?;
        if let (Some(bible), Some(arc)) = (bible, arc) {
            let outlines = arc.range(batch_start, batch_end);
            let brief = editor_brief::build_editor_brief(
                db,
                &models.extraction,
                user_id,
                &history,
                &outlines,
                &bible.protagonist.name,
                batch_start,
            )
            .await?;
            if let Some(brief) = brief {
                briefs::put_brief(db, story_id, &brief, Utc::now()).await?;
            }
        } else {
            tracing::warn!(story = story_id, "bible or arc missing at feedback ingest");
        }
    }

    // Release the awaiting state: point the story at the first missing
    // chapter of the batch and reset recovery bookkeeping.
    let resume_at = batch_start + existing;
    let mut progress = story.progress.clone();
    let expected_step = progress.current_step.as_tag();
    progress.batch_start = Some(batch_start);
    progress.batch_end = Some(batch_end);
    progress.advance(GenerationStep::GeneratingChapter(resume_at), Utc::now());

    let swapped = stories::update_progress_cas(
        db,
        story_id,
        &expected_step,
        story.updated_at,
        &progress,
        StoryStatus::Generating,
    )
    .await?;
    if !swapped {
        return Err(PipelineError::LostRace {
            story_id: story_id.to_string(),
        });
    }

    if queue_tx
        .send(GenerationJob {
            story_id: story_id.to_string(),
            reason: "feedback",
        })
        .await
        .is_err()
    {
        tracing::warn!(story = story_id, "generation queue closed, sweeper will pick the batch up");
    }

    Ok(IngestOutcome {
        checkpoint,
        generating_chapters: (resume_at..=batch_end).collect(),
        already_generated: false,
    })
}
