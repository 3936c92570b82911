/// Storyloom CLI - serialized-novel generation backplane.
///
/// Entry point for the storyloom binary. Parses CLI arguments,
/// initializes logging, and dispatches to subcommand handlers.
mod commands;

use clap::Parser;
use storyloom_core::config::Config;
use tracing_subscriber::EnvFilter;

/// Serialized-novel generation backplane
#[derive(Parser)]
#[command(name = "storyloom")]
#[command(version)]
#[command(about = "Serialized-novel generation backplane")]
#[command(after_help = "\
Quick start:
  1. storyloom init                    — write a default config file
  2. storyloom run                     — start the generation daemon
  3. storyloom premises --user <id>    — pitch three premises to a reader
  4. storyloom story create ...        — select a premise and start a book")]
struct Cli {
    /// Path to config.toml
    #[arg(
        short = 'c',
        long,
        global = true,
        default_value = "~/.storyloom/config.toml"
    )]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(commands::InitArgs),
    /// Start the generation daemon (worker pool + sweeper)
    Run(commands::RunArgs),
    /// Generate a premise set for a reader
    Premises(commands::PremisesArgs),
    /// Create, inspect, and advance stories
    Story(commands::StoryArgs),
    /// Submit or skip checkpoint feedback
    Feedback(commands::FeedbackArgs),
    /// Show LLM cost accounting
    Costs(commands::CostsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose/--quiet flags > default (info).
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("storyloom=debug,storyloom_core=debug,info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("storyloom=info,storyloom_core=info,warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init(args) => commands::init::execute(&cli.config, &args),
        Commands::Run(args) => {
            let config = load_config(&cli.config)?;
            commands::run::execute(config, &args).await
        }
        Commands::Premises(args) => {
            let config = load_config(&cli.config)?;
            commands::premises::execute(&config, &args).await
        }
        Commands::Story(args) => {
            let config = load_config(&cli.config)?;
            commands::story::execute(&config, args).await
        }
        Commands::Feedback(args) => {
            let config = load_config(&cli.config)?;
            commands::feedback::execute(&config, args).await
        }
        Commands::Costs(args) => {
            let config = load_config(&cli.config)?;
            commands::costs::execute(&config, &args).await
        }
    }
}

/// Load configuration and validate it, reporting every problem at once.
fn load_config(path: &str) -> anyhow::Result<Config> {
    let config = Config::load(path)
        .map_err(|e| anyhow::anyhow!("{e}\nRun `storyloom init` to create a config file."))?;
    if let Err(errors) = config.validate() {
        let mut message = String::from("configuration is invalid:\n");
        for error in errors {
            message.push_str(&format!("  - {error}\n"));
        }
        anyhow::bail!(message);
    }
    Ok(config)
}
