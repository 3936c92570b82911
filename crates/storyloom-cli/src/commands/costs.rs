//! Implementation of the `storyloom costs` command.

use super::{build_context, CostsArgs};
use storyloom_core::config::Config;
use storyloom_core::storage::llm_usage;

/// Execute the `storyloom costs` command.
pub async fn execute(config: &Config, args: &CostsArgs) -> anyhow::Result<()> {
    let ctx = build_context(config).await?;

    let summary = llm_usage::get_cost_summary(&ctx.db, args.user.as_deref()).await?;
    match &args.user {
        Some(user) => println!("LLM costs for reader {user}:"),
        None => println!("LLM costs (all readers):"),
    }
    println!("  today:    ${:.4} ({} calls)", summary.cost_today, summary.calls_today);
    println!("  7 days:   ${:.4} ({} calls)", summary.cost_7d, summary.calls_7d);
    println!("  30 days:  ${:.4} ({} calls)", summary.cost_30d, summary.calls_30d);
    println!(
        "  all time: ${:.4} ({} calls)",
        summary.cost_all_time, summary.calls_all_time
    );

    let breakdown = llm_usage::get_operation_breakdown(&ctx.db, args.days).await?;
    if !breakdown.is_empty() {
        println!();
        println!("By operation (last {} days):", args.days);
        for row in breakdown {
            println!(
                "  {:<22} ${:.4}  {} calls  {} in / {} out tokens",
                row.operation, row.cost, row.calls, row.input_tokens, row.output_tokens
            );
        }
    }
    Ok(())
}
