//! CLI subcommand argument definitions for Storyloom.
//!
//! Each subcommand struct defines its flags and arguments; the handlers
//! live in sibling modules.

pub mod costs;
pub mod feedback;
pub mod init;
pub mod premises;
pub mod run;
pub mod story;

use clap::Args;
use std::sync::Arc;
use storyloom_core::config::Config;
use storyloom_core::llm::factory::{build_model_set, ModelSet};
use storyloom_core::orchestrator::{
    create_generation_queue, GenerationJob, StoryEngine, StoryService,
};
use storyloom_core::storage::{init_db, DbPool};
use tokio::sync::mpsc;

/// Arguments for the `init` subcommand.
#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Override the concurrent-stories cap
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// Arguments for the `premises` subcommand.
#[derive(Debug, Args)]
pub struct PremisesArgs {
    /// Reader id
    #[arg(long)]
    pub user: String,

    /// Preferred genres (repeatable)
    #[arg(long = "genre")]
    pub genres: Vec<String>,

    /// Preferred themes (repeatable)
    #[arg(long = "theme")]
    pub themes: Vec<String>,

    /// Tone preference
    #[arg(long)]
    pub tone: Option<String>,
}

/// Arguments for the `story` subcommand tree.
#[derive(Debug, Args)]
pub struct StoryArgs {
    #[command(subcommand)]
    pub command: StoryCommand,
}

/// Story operations.
#[derive(Debug, clap::Subcommand)]
pub enum StoryCommand {
    /// Select a premise and create a story
    Create {
        /// Reader id
        #[arg(long)]
        user: String,

        /// Premise set id to select from
        #[arg(long, requires = "title")]
        set: Option<String>,

        /// Title of the premise within the set (or of a custom premise)
        #[arg(long)]
        title: Option<String>,

        /// Genre for a custom premise (skips the premise set)
        #[arg(long, conflicts_with = "set")]
        genre: Option<String>,

        /// One-line hook for a custom premise
        #[arg(long, conflicts_with = "set")]
        hook: Option<String>,
    },
    /// Show generation status
    Status {
        /// Story id
        id: String,
    },
    /// Manually advance generation (admin/test path)
    Advance {
        /// Story id
        id: String,

        /// How many chapters to generate
        #[arg(long, default_value = "1")]
        count: u32,
    },
    /// Abandon a story
    Abandon {
        /// Story id
        id: String,

        /// Reader id
        #[arg(long)]
        user: String,
    },
}

/// Arguments for the `feedback` subcommand tree.
#[derive(Debug, Args)]
pub struct FeedbackArgs {
    #[command(subcommand)]
    pub command: FeedbackCommand,
}

/// Feedback operations.
#[derive(Debug, clap::Subcommand)]
pub enum FeedbackCommand {
    /// Submit checkpoint feedback
    Submit {
        /// Reader id
        #[arg(long)]
        user: String,

        /// Story id
        #[arg(long)]
        story: String,

        /// Checkpoint name (legacy names accepted)
        #[arg(long)]
        checkpoint: String,

        /// Pacing dimension (hooked = positive)
        #[arg(long)]
        pacing: Option<String>,

        /// Tone dimension (right = positive)
        #[arg(long)]
        tone: Option<String>,

        /// Character dimension (love = positive)
        #[arg(long)]
        character: Option<String>,

        /// Free-form response instead of dimensions
        #[arg(long, conflicts_with_all = ["pacing", "tone", "character"])]
        text: Option<String>,
    },
    /// Record a checkpoint skip and advance
    Skip {
        /// Reader id
        #[arg(long)]
        user: String,

        /// Story id
        #[arg(long)]
        story: String,

        /// Checkpoint name
        #[arg(long)]
        checkpoint: String,
    },
}

/// Arguments for the `costs` subcommand.
#[derive(Debug, Args)]
pub struct CostsArgs {
    /// Scope the summary to one reader
    #[arg(long)]
    pub user: Option<String>,

    /// Days of history for the per-operation breakdown
    #[arg(long, default_value = "30")]
    pub days: u32,
}

/// Shared one-shot wiring: database, models, engine, and service.
///
/// The queue receiver is returned so enqueued jobs are buffered rather
/// than rejected; one-shot commands leave them for the daemon (or the
/// sweeper) to pick up.
pub(crate) struct AppContext {
    pub db: DbPool,
    pub service: StoryService,
    #[allow(dead_code)]
    queue_rx: mpsc::Receiver<GenerationJob>,
}

pub(crate) async fn build_context(config: &Config) -> anyhow::Result<AppContext> {
    let db = init_db(&config.storage.db_path).await?;
    let models: ModelSet = build_model_set(&config.llm)?;
    let config = Arc::new(config.clone());
    let engine = Arc::new(StoryEngine::new(db.clone(), models.clone(), config.clone()));
    let (queue_tx, queue_rx) = create_generation_queue();
    let service = StoryService::new(db.clone(), models, config, engine, queue_tx);
    Ok(AppContext {
        db,
        service,
        queue_rx,
    })
}
