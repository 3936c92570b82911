//! Implementation of the `storyloom init` command.
//!
//! Writes a default config file the operator can edit.

use super::InitArgs;
use storyloom_core::config::{expand_tilde, Config};

/// Execute the `storyloom init` command.
pub fn execute(config_path: &str, args: &InitArgs) -> anyhow::Result<()> {
    let path = expand_tilde(config_path);

    if std::path::Path::new(&path).exists() && !args.force {
        anyhow::bail!("config file already exists at {path} (use --force to overwrite)");
    }

    if let Some(parent) = std::path::Path::new(&path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let defaults = toml::to_string_pretty(&Config::default())?;
    std::fs::write(&path, defaults)?;

    println!("Wrote default config to {path}");
    println!("Set llm.api_key (or STORYLOOM_LLM__API_KEY) before running the daemon.");
    Ok(())
}
