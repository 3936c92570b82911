//! The per-story state machine driver.
//!
//! Owns the stage progression `premises -> bible -> arc -> chapters[1..3]
//! -> await_feedback_2 -> ... -> chapter_12_complete`. Every transition is
//! a single durable compare-and-swap on the story row; entering a
//! `generating_*` state whose output already exists skips the model call
//! and advances, which is what makes sweeper recovery idempotent.

use super::queue::StoryDriver;
use crate::config::Config;
use crate::llm::factory::ModelSet;
use crate::pipeline::{arc as arc_stage, bible as bible_stage, generator, PipelineError};
use crate::storage::{arcs, bibles, briefs, chapters, feedback as feedback_store, stories, DbPool};
use crate::story::{GenerationStep, Story, StoryStatus};
use chrono::Utc;
use std::sync::Arc;

/// Why an advance loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Blocked on reader feedback for the given checkpoint chapter.
    AwaitingFeedback(u32),
    /// All twelve chapters committed.
    Completed,
    /// The story is in a terminal state (failed, abandoned, archived).
    Terminal,
    /// Another writer owns the story; this task backed off.
    Blocked,
}

/// Result of a single stage step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One stage completed durably; more work remains.
    Progressed,
    /// The loop should stop with this outcome.
    Done(AdvanceOutcome),
}

/// The story engine: all pipeline stages behind one driver.
pub struct StoryEngine {
    db: DbPool,
    models: ModelSet,
    config: Arc<Config>,
}

/// The story status implied by a step.
fn status_for_step(step: GenerationStep) -> StoryStatus {
    match step {
        GenerationStep::GeneratingBible
        | GenerationStep::GeneratingArc
        | GenerationStep::GeneratingChapter(_) => StoryStatus::Generating,
        GenerationStep::AwaitingFeedback(_) => StoryStatus::Active,
        GenerationStep::Chapter12Complete => StoryStatus::Completed,
        GenerationStep::PermanentlyFailed => StoryStatus::Error,
    }
}

/// First chapter of the batch containing chapter `n`.
pub fn batch_start_for(n: u32) -> u32 {
    ((n - 1) / 3) * 3 + 1
}

impl StoryEngine {
    /// Create an engine over the shared store, model set, and config.
    pub fn new(db: DbPool, models: ModelSet, config: Arc<Config>) -> Self {
        Self { db, models, config }
    }

    /// Drive a story until it blocks, completes, or fails.
    pub async fn advance(&self, story_id: &str) -> Result<AdvanceOutcome, PipelineError> {
        loop {
            match self.advance_one(story_id).await? {
                StepOutcome::Progressed => {}
                StepOutcome::Done(outcome) => return Ok(outcome),
            }
        }
    }

    /// Execute exactly one stage step.
    pub async fn advance_one(&self, story_id: &str) -> Result<StepOutcome, PipelineError> {
        let story = stories::get_story(&self.db, story_id)
            .await?
            .ok_or_else(|| PipelineError::stage(format!("unknown story {story_id}")))?;

        if story.status.is_terminal() {
            return Ok(StepOutcome::Done(AdvanceOutcome::Terminal));
        }

        match story.progress.current_step {
            GenerationStep::GeneratingBible => {
                self.stage_bible(&story).await?;
                Ok(StepOutcome::Progressed)
            }
            GenerationStep::GeneratingArc => {
                self.stage_arc(&story).await?;
                Ok(StepOutcome::Progressed)
            }
            GenerationStep::GeneratingChapter(n) => {
                self.stage_chapter(&story, n).await?;
                Ok(StepOutcome::Progressed)
            }
            GenerationStep::AwaitingFeedback(checkpoint) => Ok(StepOutcome::Done(
                AdvanceOutcome::AwaitingFeedback(checkpoint),
            )),
            GenerationStep::Chapter12Complete => Ok(StepOutcome::Done(AdvanceOutcome::Completed)),
            GenerationStep::PermanentlyFailed => Ok(StepOutcome::Done(AdvanceOutcome::Terminal)),
        }
    }

    /// Generate and commit the bible, or skip if it already exists.
    async fn stage_bible(&self, story: &Story) -> Result<(), PipelineError> {
        if bibles::get_bible(&self.db, &story.id).await?.is_none() {
            let bible = bible_stage::generate_bible(
                &self.db,
                &self.models.generation,
                &story.user_id,
                &story.premise,
            )
            .await?;
            bibles::put_bible(&self.db, &story.id, &bible, Utc::now()).await?;
        } else {
            tracing::info!(story = %story.id, "bible already exists, skipping generation");
        }
        self.transition(story, GenerationStep::GeneratingArc, None).await
    }

    /// Generate and commit the arc, or skip if it already exists.
    async fn stage_arc(&self, story: &Story) -> Result<(), PipelineError> {
        if arcs::get_current_arc(&self.db, &story.id).await?.is_none() {
            let bible = bibles::get_bible(&self.db, &story.id)
                .await?
                .ok_or_else(|| PipelineError::stage("arc stage reached without a bible"))?;
            let arc = arc_stage::generate_arc(
                &self.db,
                &self.models.generation,
                &story.user_id,
                &story.premise,
                &bible,
                &self.config.generation,
            )
            .await?;
            arcs::put_arc(&self.db, &story.id, 1, &arc, Utc::now()).await?;
        } else {
            tracing::info!(story = %story.id, "arc already exists, skipping generation");
        }
        self.transition(story, GenerationStep::GeneratingChapter(1), None)
            .await
    }

    /// Generate and commit chapter `n`, or skip if the slot is filled.
    ///
    /// Chapters within a batch are strictly sequential: this stage runs for
    /// chapter N only after N-1 committed, because the prompt depends on
    /// N-1's committed key events and closing hook.
    async fn stage_chapter(&self, story: &Story, n: u32) -> Result<(), PipelineError> {
        if chapters::chapter_exists(&self.db, &story.id, n).await? {
            tracing::info!(story = %story.id, chapter = n, "chapter already committed, skipping generation");
            let committed = chapters::count_chapters(&self.db, &story.id).await?;
            return self
                .transition(story, GenerationStep::after_chapter(n), Some(committed))
                .await;
        }

        let bible = bibles::get_bible(&self.db, &story.id)
            .await?
            .ok_or_else(|| PipelineError::stage("chapter stage reached without a bible"))?;
        let arc = arcs::get_current_arc(&self.db, &story.id)
            .await?
            .ok_or_else(|| PipelineError::stage("chapter stage reached without an arc"))?;
        let brief = briefs::get_brief(&self.db, &story.id, batch_start_for(n)).await?;
        let history = feedback_store::feedback_history(&self.db, &story.id).await?;

        let ctx = generator::ChapterContext {
            story,
            bible: &bible,
            arc: &arc,
            chapter_number: n,
            brief: brief.as_ref(),
            feedback_history: &history,
        };
        let built = generator::build_chapter(&self.db, &self.models, &self.config, &ctx).await?;

        let next = GenerationStep::after_chapter(n);
        let mut progress = story.progress.clone();
        let expected_step = progress.current_step.as_tag();
        progress.chapters_generated = progress.chapters_generated.max(n);
        progress.advance(next, Utc::now());

        let committed = chapters::commit_chapter_with_progress(
            &self.db,
            &built.chapter,
            &expected_step,
            story.updated_at,
            &progress,
            status_for_step(next),
        )
        .await?;
        if !committed {
            return Err(PipelineError::LostRace {
                story_id: story.id.clone(),
            });
        }

        tracing::info!(
            story = %story.id,
            chapter = n,
            accepted = built.accepted,
            words = built.chapter.word_count,
            next = %next,
            "chapter committed"
        );

        generator::run_post_commit(&self.db, &self.models, &story.user_id, &bible, &built.chapter)
            .await;
        Ok(())
    }

    /// Durably move a story to `next`, CAS-guarded by the read state.
    async fn transition(
        &self,
        story: &Story,
        next: GenerationStep,
        chapters_committed: Option<u32>,
    ) -> Result<(), PipelineError> {
        let mut progress = story.progress.clone();
        let expected_step = progress.current_step.as_tag();
        if let Some(count) = chapters_committed {
            progress.chapters_generated = progress.chapters_generated.max(count);
        }
        progress.advance(next, Utc::now());

        let swapped = stories::update_progress_cas(
            &self.db,
            &story.id,
            &expected_step,
            story.updated_at,
            &progress,
            status_for_step(next),
        )
        .await?;
        if !swapped {
            return Err(PipelineError::LostRace {
                story_id: story.id.clone(),
            });
        }
        tracing::info!(story = %story.id, from = %expected_step, to = %next, "stage transition");
        Ok(())
    }

    /// Record a stage failure into the progress blob, best-effort.
    ///
    /// The step does not move: the sweeper decides between retry and the
    /// circuit breaker.
    async fn record_failure(&self, story_id: &str, message: &str) {
        let story = match stories::get_story(&self.db, story_id).await {
            Ok(Some(story)) => story,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(story = story_id, error = %e, "failed to load story while recording failure");
                return;
            }
        };
        if !story.progress.current_step.is_generating() {
            return;
        }
        let mut progress = story.progress.clone();
        let expected_step = progress.current_step.as_tag();
        progress.record_error(message.to_string(), Utc::now());

        match stories::update_progress_cas(
            &self.db,
            story_id,
            &expected_step,
            story.updated_at,
            &progress,
            story.status,
        )
        .await
        {
            Ok(true) => {
                tracing::info!(story = story_id, error = message, "stage failure recorded");
            }
            Ok(false) => {
                tracing::debug!(story = story_id, "failure record lost a race, leaving row as-is");
            }
            Err(e) => {
                tracing::warn!(story = story_id, error = %e, "failed to record stage failure");
            }
        }
    }
}

#[async_trait::async_trait]
impl StoryDriver for StoryEngine {
    async fn drive(&self, story_id: &str) {
        match self.advance(story_id).await {
            Ok(outcome) => {
                tracing::info!(story = story_id, outcome = ?outcome, "story drive finished");
            }
            Err(PipelineError::LostRace { .. }) => {
                tracing::info!(story = story_id, "another writer owns this story, backing off");
            }
            Err(e) => {
                tracing::warn!(story = story_id, error = %e, "story drive failed");
                self.record_failure(story_id, &e.to_string()).await;
            }
        }
    }
}
