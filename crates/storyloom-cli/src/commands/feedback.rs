//! Implementation of the `storyloom feedback` command tree.

use super::{build_context, FeedbackArgs, FeedbackCommand};
use storyloom_core::config::Config;
use storyloom_core::story::{DimensionFeedback, FeedbackPayload};

/// Execute a `storyloom feedback` subcommand.
pub async fn execute(config: &Config, args: FeedbackArgs) -> anyhow::Result<()> {
    let ctx = build_context(config).await?;

    match args.command {
        FeedbackCommand::Submit {
            user,
            story,
            checkpoint,
            pacing,
            tone,
            character,
            text,
        } => {
            let payload = match text {
                Some(response) => FeedbackPayload::FreeForm { response },
                None => FeedbackPayload::Dimensions(DimensionFeedback {
                    pacing,
                    tone,
                    character,
                }),
            };

            let outcome = ctx
                .service
                .submit_checkpoint_feedback(&user, &story, &checkpoint, payload)
                .await?;

            println!("Feedback stored under {}.", outcome.checkpoint.as_tag());
            if outcome.already_generated {
                println!("Next batch already exists; advanced without regenerating.");
            } else if outcome.generating_chapters.is_empty() {
                println!("Record-only checkpoint; nothing to generate.");
            } else {
                println!(
                    "Generating chapters {:?} (daemon or `story advance` will produce them).",
                    outcome.generating_chapters
                );
            }
        }
        FeedbackCommand::Skip {
            user,
            story,
            checkpoint,
        } => {
            let outcome = ctx.service.skip_checkpoint(&user, &story, &checkpoint).await?;
            println!(
                "Checkpoint {} skipped; next batch: {:?}.",
                outcome.checkpoint.as_tag(),
                outcome.generating_chapters
            );
        }
    }
    Ok(())
}
