//! Generation job queue and worker pool.
//!
//! Every stage transition enqueues the next unit of work as a
//! [`GenerationJob`]; the service layer and the sweeper are the two
//! producers, and a single consumer drains the bounded channel into a
//! semaphore-capped pool of per-story tasks. The cap is the global
//! concurrent-stories limit that keeps the system inside upstream LLM
//! rate limits.
//!
//! A story already in flight is not dispatched twice: duplicate jobs are
//! dropped while the first is running, and the engine's existence checks
//! plus the progress CAS make any survivor harmless.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Bounded channel capacity for the generation queue.
pub const QUEUE_CAPACITY: usize = 100;

/// A unit of work: drive one story forward from its durable state.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    /// The story to drive.
    pub story_id: String,
    /// Which producer enqueued it (for logs): `select_premise`, `feedback`,
    /// `sweeper`, `manual`.
    pub reason: &'static str,
}

/// Port for the worker pool to drive a story.
///
/// Implemented by the orchestrator engine; mocked in tests.
#[async_trait::async_trait]
pub trait StoryDriver: Send + Sync {
    /// Advance the story until it blocks, completes, or fails. All durable
    /// state handling is the driver's responsibility; the pool only
    /// schedules.
    async fn drive(&self, story_id: &str);
}

/// Create the bounded generation queue.
///
/// Clone the sender for each producer; pass the receiver to
/// [`run_worker_pool`].
pub fn create_generation_queue() -> (mpsc::Sender<GenerationJob>, mpsc::Receiver<GenerationJob>) {
    mpsc::channel(QUEUE_CAPACITY)
}

/// Run the worker pool until cancellation.
///
/// At most `concurrency` stories generate simultaneously. On cancellation
/// the pool stops dispatching and waits for in-flight stories to reach
/// their next durable checkpoint.
pub async fn run_worker_pool(
    mut receiver: mpsc::Receiver<GenerationJob>,
    driver: Arc<dyn StoryDriver>,
    concurrency: usize,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut tasks = JoinSet::new();

    tracing::info!(concurrency = concurrency, "worker pool started");

    loop {
        // Reap finished tasks opportunistically so the JoinSet stays small.
        while tasks.try_join_next().is_some() {}

        let job = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("worker pool received cancellation");
                break;
            }
            job = receiver.recv() => {
                match job {
                    Some(job) => job,
                    None => {
                        tracing::info!("generation queue closed");
                        break;
                    }
                }
            }
        };

        {
            let mut guard = in_flight.lock().expect("in-flight lock");
            if !guard.insert(job.story_id.clone()) {
                tracing::debug!(
                    story = %job.story_id,
                    reason = job.reason,
                    "story already in flight, dropping duplicate job"
                );
                continue;
            }
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                in_flight.lock().expect("in-flight lock").remove(&job.story_id);
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            }
        };

        let driver = driver.clone();
        let in_flight = in_flight.clone();
        tasks.spawn(async move {
            tracing::info!(story = %job.story_id, reason = job.reason, "driving story");
            driver.drive(&job.story_id).await;
            in_flight.lock().expect("in-flight lock").remove(&job.story_id);
            drop(permit);
        });
    }

    // Let in-flight stories reach their next durable checkpoint.
    while tasks.join_next().await.is_some() {}
    tracing::info!("worker pool stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingDriver {
        calls: AtomicUsize,
        concurrent: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl CountingDriver {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait::async_trait]
    impl StoryDriver for CountingDriver {
        async fn drive(&self, _story_id: &str) {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn drains_jobs_and_respects_cap() {
        let (tx, rx) = create_generation_queue();
        let driver = Arc::new(CountingDriver::new(Duration::from_millis(50)));
        let cancel = CancellationToken::new();

        let pool = tokio::spawn(run_worker_pool(rx, driver.clone(), 2, cancel.clone()));

        for i in 0..6 {
            tx.send(GenerationJob {
                story_id: format!("s{i}"),
                reason: "manual",
            })
            .await
            .expect("send");
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        pool.await.expect("pool");

        assert_eq!(driver.calls.load(Ordering::SeqCst), 6);
        assert!(driver.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn duplicate_in_flight_story_is_dropped() {
        let (tx, rx) = create_generation_queue();
        let driver = Arc::new(CountingDriver::new(Duration::from_millis(200)));
        let cancel = CancellationToken::new();

        let pool = tokio::spawn(run_worker_pool(rx, driver.clone(), 4, cancel.clone()));

        for _ in 0..3 {
            tx.send(GenerationJob {
                story_id: "same-story".to_string(),
                reason: "sweeper",
            })
            .await
            .expect("send");
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        pool.await.expect("pool");

        // Only the first dispatch ran; the duplicates were dropped while it
        // was in flight.
        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_waits_for_in_flight_work() {
        let (tx, rx) = create_generation_queue();
        let driver = Arc::new(CountingDriver::new(Duration::from_millis(100)));
        let cancel = CancellationToken::new();

        let pool = tokio::spawn(run_worker_pool(rx, driver.clone(), 1, cancel.clone()));

        tx.send(GenerationJob {
            story_id: "s1".to_string(),
            reason: "manual",
        })
        .await
        .expect("send");

        // Cancel while the job is mid-flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        pool.await.expect("pool");

        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_channel_stops_pool() {
        let (tx, rx) = create_generation_queue();
        let driver = Arc::new(CountingDriver::new(Duration::from_millis(1)));
        let cancel = CancellationToken::new();

        let pool = tokio::spawn(run_worker_pool(rx, driver.clone(), 2, cancel));
        drop(tx);
        pool.await.expect("pool");
    }
}
