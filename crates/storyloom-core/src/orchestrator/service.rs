//! Inbound operations facade.
//!
//! The `StoryService` is what the outer request layer (here, the CLI)
//! calls. Every operation returns quickly; generation itself runs
//! detached on the worker pool, so a disconnecting client never aborts a
//! pipeline.

use super::engine::{StepOutcome, StoryEngine};
use super::feedback::{ingest_feedback, IngestOutcome};
use super::queue::GenerationJob;
use crate::config::Config;
use crate::llm::factory::ModelSet;
use crate::pipeline::{premises, PipelineError};
use crate::storage::{chapters, premises as premise_store, stories, DbPool};
use crate::story::{
    ChapterSummary, FeedbackPayload, GenerationProgress, Premise, PremiseSet, ReaderPreferences,
    Story, StoryStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How a premise is selected.
#[derive(Debug, Clone)]
pub enum PremiseRef {
    /// A premise from a previously generated set, by set id and title.
    FromSet {
        /// The premise set.
        set_id: String,
        /// Title of the chosen premise within the set.
        title: String,
    },
    /// A reader-supplied custom premise.
    Custom(Premise),
}

/// Snapshot returned by `generation_status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationStatus {
    /// Story lifecycle status tag.
    pub status: String,
    /// Current state-machine step tag.
    pub current_step: String,
    /// Committed, readable chapters.
    pub chapters_available: u32,
    /// The recorded error, surfaced only on permanent failure.
    pub error: Option<String>,
}

/// The inbound operations surface.
pub struct StoryService {
    db: DbPool,
    models: ModelSet,
    config: Arc<Config>,
    engine: Arc<StoryEngine>,
    queue_tx: mpsc::Sender<GenerationJob>,
}

impl StoryService {
    /// Assemble the service over shared dependencies.
    pub fn new(
        db: DbPool,
        models: ModelSet,
        config: Arc<Config>,
        engine: Arc<StoryEngine>,
        queue_tx: mpsc::Sender<GenerationJob>,
    ) -> Self {
        Self {
            db,
            models,
            config,
            engine,
            queue_tx,
        }
    }

    /// Generate a fresh premise set for a reader.
    pub async fn generate_premises(
        &self,
        user_id: &str,
        prefs: &ReaderPreferences,
    ) -> Result<PremiseSet, PipelineError> {
        premises::generate_premise_set(&self.db, &self.models.generation, user_id, prefs).await
    }

    /// Create a story from a selected premise and begin pre-generation.
    ///
    /// Returns the story id immediately; generation runs detached.
    pub async fn select_premise(
        &self,
        user_id: &str,
        premise_ref: PremiseRef,
    ) -> Result<String, PipelineError> {
        let premise = match premise_ref {
            PremiseRef::FromSet { set_id, title } => {
                let set = premise_store::get_premise_set(&self.db, &set_id)
                    .await?
                    .ok_or_else(|| PipelineError::stage(format!("unknown premise set {set_id}")))?;
                let premise = set
                    .premises
                    .iter()
                    .find(|p| p.title == title)
                    .cloned()
                    .ok_or_else(|| {
                        PipelineError::stage(format!("no premise titled '{title}' in set {set_id}"))
                    })?;
                premise_store::mark_discarded(&self.db, &set_id).await?;
                premise
            }
            PremiseRef::Custom(premise) => premise,
        };

        let now = Utc::now();
        let story = Story {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: premise.title.clone(),
            genre: premise.genre.clone(),
            status: StoryStatus::Generating,
            premise,
            progress: GenerationProgress::new(now),
            series_id: None,
            book_number: None,
            cover_url: None,
            created_at: now,
            updated_at: now,
        };
        stories::insert_story(&self.db, &story).await?;

        if self
            .queue_tx
            .send(GenerationJob {
                story_id: story.id.clone(),
                reason: "select_premise",
            })
            .await
            .is_err()
        {
            tracing::warn!(story = %story.id, "generation queue closed, sweeper will pick the story up");
        }

        tracing::info!(story = %story.id, user = user_id, title = %story.title, "story created");
        Ok(story.id)
    }

    /// Current generation status of a story.
    pub async fn generation_status(
        &self,
        story_id: &str,
    ) -> Result<GenerationStatus, PipelineError> {
        let story = stories::get_story(&self.db, story_id)
            .await?
            .ok_or_else(|| PipelineError::stage(format!("unknown story {story_id}")))?;
        let chapters_available = chapters::count_chapters(&self.db, story_id).await?;

        let error = if story.status == StoryStatus::Error {
            story.progress.last_error.clone()
        } else {
            None
        };

        Ok(GenerationStatus {
            status: story.status.as_tag().to_string(),
            current_step: story.progress.current_step.as_tag(),
            chapters_available,
            error,
        })
    }

    /// Manual advancement: drive the story inline until `count` more
    /// chapters are committed or it blocks. Admin/test path.
    pub async fn generate_next(
        &self,
        story_id: &str,
        count: u32,
    ) -> Result<Vec<ChapterSummary>, PipelineError> {
        let before = chapters::count_chapters(&self.db, story_id).await?;
        let target = before + count;

        loop {
            let committed = chapters::count_chapters(&self.db, story_id).await?;
            if committed >= target {
                break;
            }
            match self.engine.advance_one(story_id).await? {
                StepOutcome::Progressed => {}
                StepOutcome::Done(outcome) => {
                    tracing::info!(story = story_id, outcome = ?outcome, "manual advance stopped");
                    break;
                }
            }
        }

        let summaries = chapters::list_summaries(&self.db, story_id).await?;
        Ok(summaries
            .into_iter()
            .filter(|s| s.chapter_number > before)
            .collect())
    }

    /// Submit checkpoint feedback and kick the next batch.
    pub async fn submit_checkpoint_feedback(
        &self,
        user_id: &str,
        story_id: &str,
        checkpoint: &str,
        payload: FeedbackPayload,
    ) -> Result<IngestOutcome, PipelineError> {
        ingest_feedback(
            &self.db,
            &self.models,
            &self.config,
            &self.queue_tx,
            user_id,
            story_id,
            checkpoint,
            payload,
        )
        .await
    }

    /// Record a checkpoint skip and advance.
    pub async fn skip_checkpoint(
        &self,
        user_id: &str,
        story_id: &str,
        checkpoint: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        ingest_feedback(
            &self.db,
            &self.models,
            &self.config,
            &self.queue_tx,
            user_id,
            story_id,
            checkpoint,
            FeedbackPayload::Skipped,
        )
        .await
    }

    /// Abandon a story. Terminal; the sweeper will never touch it again.
    pub async fn abandon_story(&self, user_id: &str, story_id: &str) -> Result<(), PipelineError> {
        let story = stories::get_story(&self.db, story_id)
            .await?
            .ok_or_else(|| PipelineError::stage(format!("unknown story {story_id}")))?;
        if story.user_id != user_id {
            return Err(PipelineError::stage("story belongs to a different reader"));
        }
        stories::update_status(&self.db, story_id, StoryStatus::Abandoned, Utc::now()).await?;
        tracing::info!(story = story_id, "story abandoned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::queue::create_generation_queue;
    use crate::pipeline::test_support::{gateway, ScriptedProvider};
    use crate::storage::init_test_db;
    use crate::story::PremiseTier;
    use std::sync::Arc as StdArc;

    fn premise() -> Premise {
        Premise {
            title: "The Tide Keeper".to_string(),
            description: "d".to_string(),
            hook: "h".to_string(),
            genre: "fantasy".to_string(),
            themes: vec![],
            tier: PremiseTier::Comfort,
        }
    }

    fn service(db: DbPool) -> (StoryService, mpsc::Receiver<GenerationJob>) {
        let models = ModelSet {
            generation: gateway(StdArc::new(ScriptedProvider::always("unused"))),
            validation: gateway(StdArc::new(ScriptedProvider::always("unused"))),
            extraction: gateway(StdArc::new(ScriptedProvider::always("unused"))),
        };
        let config = StdArc::new(Config::default());
        let engine = StdArc::new(StoryEngine::new(db.clone(), models.clone(), config.clone()));
        let (tx, rx) = create_generation_queue();
        (
            StoryService::new(db, models, config, engine, tx),
            rx,
        )
    }

    #[tokio::test]
    async fn select_custom_premise_creates_story_and_enqueues() {
        let db = init_test_db().await.expect("db");
        let (service, mut rx) = service(db.clone());

        let story_id = service
            .select_premise("u1", PremiseRef::Custom(premise()))
            .await
            .expect("select");

        let job = rx.try_recv().expect("job");
        assert_eq!(job.story_id, story_id);
        assert_eq!(job.reason, "select_premise");

        let status = service.generation_status(&story_id).await.expect("status");
        assert_eq!(status.status, "generating");
        assert_eq!(status.current_step, "generating_bible");
        assert_eq!(status.chapters_available, 0);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn select_from_set_discards_the_set() {
        let db = init_test_db().await.expect("db");
        let (service, _rx) = service(db.clone());

        let set = PremiseSet {
            id: "ps1".to_string(),
            user_id: "u1".to_string(),
            premises: vec![
                premise(),
                Premise {
                    title: "Salt and Iron".to_string(),
                    tier: PremiseTier::Stretch,
                    ..premise()
                },
                Premise {
                    title: "The Paper Moon Heist".to_string(),
                    tier: PremiseTier::Wildcard,
                    ..premise()
                },
            ],
            status: "active".to_string(),
            created_at: Utc::now(),
        };
        premise_store::insert_premise_set(&db, &set).await.expect("insert");

        let story_id = service
            .select_premise(
                "u1",
                PremiseRef::FromSet {
                    set_id: "ps1".to_string(),
                    title: "Salt and Iron".to_string(),
                },
            )
            .await
            .expect("select");

        let story = stories::get_story(&db, &story_id).await.expect("get").expect("some");
        assert_eq!(story.title, "Salt and Iron");

        let loaded = premise_store::get_premise_set(&db, "ps1")
            .await
            .expect("get")
            .expect("some");
        assert_eq!(loaded.status, "discarded");
    }

    #[tokio::test]
    async fn select_unknown_premise_title_fails() {
        let db = init_test_db().await.expect("db");
        let (service, _rx) = service(db.clone());

        let set = PremiseSet {
            id: "ps1".to_string(),
            user_id: "u1".to_string(),
            premises: vec![premise(), premise(), premise()],
            status: "active".to_string(),
            created_at: Utc::now(),
        };
        premise_store::insert_premise_set(&db, &set).await.expect("insert");

        let err = service
            .select_premise(
                "u1",
                PremiseRef::FromSet {
                    set_id: "ps1".to_string(),
                    title: "Nonexistent".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Stage { .. }));
    }

    #[tokio::test]
    async fn status_surfaces_error_only_when_permanently_failed() {
        let db = init_test_db().await.expect("db");
        let (service, _rx) = service(db.clone());

        let story_id = service
            .select_premise("u1", PremiseRef::Custom(premise()))
            .await
            .expect("select");

        // Record a transient failure: not surfaced.
        let story = stories::get_story(&db, &story_id).await.expect("get").expect("some");
        let mut progress = story.progress.clone();
        progress.record_error("transient".to_string(), Utc::now());
        assert!(stories::update_progress_cas(
            &db,
            &story_id,
            "generating_bible",
            story.updated_at,
            &progress,
            StoryStatus::Generating,
        )
        .await
        .expect("cas"));

        let status = service.generation_status(&story_id).await.expect("status");
        assert!(status.error.is_none());

        // Permanent failure: surfaced.
        let story = stories::get_story(&db, &story_id).await.expect("get").expect("some");
        let mut progress = story.progress.clone();
        progress.current_step = crate::story::GenerationStep::PermanentlyFailed;
        assert!(stories::update_progress_cas(
            &db,
            &story_id,
            "generating_bible",
            story.updated_at,
            &progress,
            StoryStatus::Error,
        )
        .await
        .expect("cas"));

        let status = service.generation_status(&story_id).await.expect("status");
        assert_eq!(status.status, "error");
        assert_eq!(status.current_step, "permanently_failed");
        assert_eq!(status.error.as_deref(), Some("transient"));
    }

    #[tokio::test]
    async fn abandon_checks_ownership() {
        let db = init_test_db().await.expect("db");
        let (service, _rx) = service(db.clone());

        let story_id = service
            .select_premise("u1", PremiseRef::Custom(premise()))
            .await
            .expect("select");

        let err = service.abandon_story("someone-else", &story_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Stage { .. }));

        service.abandon_story("u1", &story_id).await.expect("abandon");
        let status = service.generation_status(&story_id).await.expect("status");
        assert_eq!(status.status, "abandoned");
    }
}
