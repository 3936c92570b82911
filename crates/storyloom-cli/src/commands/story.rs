//! Implementation of the `storyloom story` command tree.

use super::{build_context, StoryArgs, StoryCommand};
use storyloom_core::config::Config;
use storyloom_core::orchestrator::PremiseRef;
use storyloom_core::story::{Premise, PremiseTier};

/// Execute a `storyloom story` subcommand.
pub async fn execute(config: &Config, args: StoryArgs) -> anyhow::Result<()> {
    let ctx = build_context(config).await?;

    match args.command {
        StoryCommand::Create {
            user,
            set,
            title,
            genre,
            hook,
        } => {
            let premise_ref = match (set, title) {
                (Some(set_id), Some(title)) => PremiseRef::FromSet { set_id, title },
                (None, title) => {
                    let title = title
                        .ok_or_else(|| anyhow::anyhow!("--title is required for a custom premise"))?;
                    PremiseRef::Custom(Premise {
                        title,
                        description: String::new(),
                        hook: hook.unwrap_or_default(),
                        genre: genre.unwrap_or_else(|| "fiction".to_string()),
                        themes: vec![],
                        tier: PremiseTier::Comfort,
                    })
                }
                (Some(_), None) => {
                    anyhow::bail!("--title is required when selecting from a premise set")
                }
            };

            let story_id = ctx.service.select_premise(&user, premise_ref).await?;
            println!("Story created: {story_id}");
            println!("Generation begins when the daemon is running (storyloom run),");
            println!("or drive it manually: storyloom story advance {story_id} --count 3");
        }
        StoryCommand::Status { id } => {
            let status = ctx.service.generation_status(&id).await?;
            println!("status:             {}", status.status);
            println!("current step:       {}", status.current_step);
            println!("chapters available: {}", status.chapters_available);
            if let Some(error) = status.error {
                println!("error:              {error}");
            }
        }
        StoryCommand::Advance { id, count } => {
            let summaries = ctx.service.generate_next(&id, count).await?;
            if summaries.is_empty() {
                println!("No chapters generated (story blocked, complete, or failed).");
            }
            for summary in summaries {
                println!(
                    "chapter {:>2}: {} ({} words{}{})",
                    summary.chapter_number,
                    summary.title,
                    summary.word_count,
                    summary
                        .quality_score
                        .map(|s| format!(", quality {s:.1}"))
                        .unwrap_or_default(),
                    if summary.flagged { ", flagged" } else { "" },
                );
            }
        }
        StoryCommand::Abandon { id, user } => {
            ctx.service.abandon_story(&user, &id).await?;
            println!("Story {id} abandoned.");
        }
    }
    Ok(())
}
