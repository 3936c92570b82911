//! The self-healing sweeper.
//!
//! A scheduled task that finds stories with a recorded stage failure or a
//! stale `generating_*` step, applies the circuit breaker, and re-enqueues
//! survivors at their last durable checkpoint. The sweeper is the only
//! component that retries across process boundaries; it runs at startup
//! and on a fixed jittered interval.
//!
//! Circuit breaker, in order:
//! 1. `health_check_retries` at the bound: permanently failed.
//! 2. The same error recorded twice in a row: permanently failed (a
//!    deterministic bug; further retries waste budget).
//! 3. Otherwise: increment the retry count, remember the error acted on,
//!    and re-enqueue.

use super::queue::GenerationJob;
use super::scheduler::LoopScheduler;
use crate::config::SweeperConfig;
use crate::error::StorageError;
use crate::storage::{stories, DbPool};
use crate::story::{GenerationStep, Story, StoryStatus};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upper bound of the sweep-interval jitter.
const SWEEP_JITTER_MAX: Duration = Duration::from_secs(30);

/// Counters from one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    /// Stories examined.
    pub scanned: usize,
    /// Stories re-enqueued for recovery.
    pub requeued: usize,
    /// Stories the circuit breaker marked permanently failed.
    pub tripped: usize,
    /// Stories skipped as fresh (someone else owns them).
    pub skipped: usize,
}

/// Run one sweep over the store.
pub async fn sweep_once(
    db: &DbPool,
    config: &SweeperConfig,
    queue_tx: &mpsc::Sender<GenerationJob>,
) -> Result<SweepSummary, StorageError> {
    let candidates = stories::list_generating_stories(db).await?;
    let mut summary = SweepSummary {
        scanned: candidates.len(),
        ..SweepSummary::default()
    };
    let staleness = ChronoDuration::seconds(config.staleness_secs as i64);
    let now = Utc::now();

    for story in candidates {
        let failed = story.progress.last_error.is_some();
        let stale = now.signed_duration_since(story.updated_at) > staleness;

        if !failed && !stale {
            // Fresh and healthy: an in-flight task owns this row.
            summary.skipped += 1;
            continue;
        }

        // Cover generation is an external collaborator; note it only when
        // no cover exists yet.
        if story.cover_url.is_none() {
            tracing::debug!(story = %story.id, "cover image still pending (external service)");
        }

        if story.progress.health_check_retries >= config.max_recovery_retries {
            trip(db, &story, "recovery retry budget exhausted").await?;
            summary.tripped += 1;
            continue;
        }

        if story.progress.health_check_retries >= 1
            && story.progress.last_error.is_some()
            && story.progress.last_error == story.progress.prior_error
        {
            trip(db, &story, "same error twice, deterministic failure").await?;
            summary.tripped += 1;
            continue;
        }

        // Claim the story: bump the retry count, move the error into
        // prior_error for same-error detection, and stamp the row so a
        // concurrent sweeper sees it as fresh. The CAS makes the claim
        // single-winner.
        let mut progress = story.progress.clone();
        let expected_step = progress.current_step.as_tag();
        progress.health_check_retries += 1;
        progress.prior_error = progress.last_error.take();
        progress.last_updated = Utc::now();

        let claimed = stories::update_progress_cas(
            db,
            &story.id,
            &expected_step,
            story.updated_at,
            &progress,
            story.status,
        )
        .await?;
        if !claimed {
            tracing::debug!(story = %story.id, "sweep claim lost a race, skipping");
            summary.skipped += 1;
            continue;
        }

        tracing::info!(
            story = %story.id,
            step = %story.progress.current_step,
            retries = progress.health_check_retries,
            error = story.progress.last_error.as_deref().unwrap_or("stale"),
            "re-enqueueing stalled story"
        );
        if queue_tx
            .send(GenerationJob {
                story_id: story.id.clone(),
                reason: "sweeper",
            })
            .await
            .is_err()
        {
            tracing::warn!(story = %story.id, "generation queue closed during sweep");
            break;
        }
        summary.requeued += 1;
    }

    tracing::info!(
        scanned = summary.scanned,
        requeued = summary.requeued,
        tripped = summary.tripped,
        skipped = summary.skipped,
        "sweep complete"
    );
    Ok(summary)
}

/// Mark a story permanently failed, preserving the recorded error.
async fn trip(db: &DbPool, story: &Story, reason: &str) -> Result<(), StorageError> {
    let mut progress = story.progress.clone();
    let expected_step = progress.current_step.as_tag();
    progress.current_step = GenerationStep::PermanentlyFailed;
    progress.last_updated = Utc::now();

    let swapped = stories::update_progress_cas(
        db,
        &story.id,
        &expected_step,
        story.updated_at,
        &progress,
        StoryStatus::Error,
    )
    .await?;
    if swapped {
        tracing::warn!(
            story = %story.id,
            reason = reason,
            last_error = progress.last_error.as_deref().unwrap_or(""),
            "circuit breaker tripped, story permanently failed"
        );
    }
    Ok(())
}

/// Run the sweeper until cancellation: once at startup, then on the
/// configured interval with jitter.
pub async fn run_sweeper(
    db: DbPool,
    config: SweeperConfig,
    queue_tx: mpsc::Sender<GenerationJob>,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = config.interval_secs,
        staleness_secs = config.staleness_secs,
        max_recovery_retries = config.max_recovery_retries,
        "sweeper started"
    );

    let scheduler = LoopScheduler::new(
        Duration::from_secs(config.interval_secs),
        Duration::ZERO,
        SWEEP_JITTER_MAX,
    );

    loop {
        if let Err(e) = sweep_once(&db, &config, &queue_tx).await {
            tracing::warn!(error = %e, "sweep failed, will retry next interval");
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = scheduler.tick() => {}
        }
    }

    tracing::info!("sweeper stopped");
}
