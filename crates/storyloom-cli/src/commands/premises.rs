//! Implementation of the `storyloom premises` command.

use super::{build_context, PremisesArgs};
use storyloom_core::config::Config;
use storyloom_core::story::ReaderPreferences;

/// Execute the `storyloom premises` command.
pub async fn execute(config: &Config, args: &PremisesArgs) -> anyhow::Result<()> {
    let ctx = build_context(config).await?;

    let prefs = ReaderPreferences {
        genres: args.genres.clone(),
        themes: args.themes.clone(),
        tone: args.tone.clone(),
        notes: None,
    };

    let set = ctx.service.generate_premises(&args.user, &prefs).await?;

    println!("Premise set {} for reader {}:", set.id, set.user_id);
    for premise in &set.premises {
        println!();
        println!("  [{:?}] {}", premise.tier, premise.title);
        println!("    genre: {}", premise.genre);
        println!("    {}", premise.description);
        println!("    hook: {}", premise.hook);
    }
    println!();
    println!(
        "Select with: storyloom story create --user {} --set {} --title \"<title>\"",
        set.user_id, set.id
    );
    Ok(())
}
