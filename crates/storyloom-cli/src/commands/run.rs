//! Implementation of the `storyloom run` command.
//!
//! The main entry point for autonomous operation. Initializes the store
//! and model set, starts the worker pool and the self-healing sweeper,
//! and waits for a shutdown signal. The sweeper's startup pass resumes
//! any story stranded by a previous crash.

use super::RunArgs;
use std::sync::Arc;
use storyloom_core::config::Config;
use storyloom_core::llm::factory::build_model_set;
use storyloom_core::orchestrator::{create_generation_queue, run_sweeper, run_worker_pool, StoryEngine};
use storyloom_core::storage::init_db;
use tokio_util::sync::CancellationToken;

/// Execute the `storyloom run` command.
pub async fn execute(config: Config, args: &RunArgs) -> anyhow::Result<()> {
    let db = init_db(&config.storage.db_path).await?;
    tracing::info!(path = %config.storage.db_path, "database ready");

    let models = build_model_set(&config.llm)?;
    tracing::info!(
        provider = %config.llm.provider,
        generation = %config.llm.model_generation,
        validation = %config.llm.model_validation,
        extraction = %config.llm.model_extraction,
        "model set ready"
    );

    let concurrency = args.concurrency.unwrap_or(config.runtime.concurrent_stories);
    let config = Arc::new(config);
    let engine = Arc::new(StoryEngine::new(db.clone(), models, config.clone()));

    let (queue_tx, queue_rx) = create_generation_queue();
    let cancel = CancellationToken::new();

    let pool = tokio::spawn(run_worker_pool(
        queue_rx,
        engine.clone(),
        concurrency,
        cancel.clone(),
    ));
    let sweeper = tokio::spawn(run_sweeper(
        db.clone(),
        config.sweeper.clone(),
        queue_tx.clone(),
        cancel.clone(),
    ));

    eprintln!(
        "storyloom daemon running (concurrency {concurrency}, sweep every {}s). Ctrl+C to stop.",
        config.sweeper.interval_secs
    );

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");
    cancel.cancel();
    drop(queue_tx);

    let _ = sweeper.await;
    let _ = pool.await;
    db.close().await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for an OS shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler, using Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Ctrl+C handler error");
                }
                tracing::info!("received Ctrl+C");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
