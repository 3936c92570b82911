//! Orchestration runtime: the per-story state machine, the generation
//! queue and worker pool, the self-healing sweeper, and the inbound
//! service facade.
//!
//! Submodules:
//! - [`engine`]: per-story driver with idempotent, CAS-guarded stage
//!   transitions.
//! - [`queue`]: bounded MPSC generation queue + semaphore-capped workers.
//! - [`scheduler`]: interval + jitter pacing for background loops.
//! - [`sweeper`]: crash recovery with a circuit breaker.
//! - [`feedback`]: checkpoint feedback ingest.
//! - [`service`]: the operations the outer request layer calls.

pub mod engine;
pub mod feedback;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod sweeper;

pub use engine::{AdvanceOutcome, StepOutcome, StoryEngine};
pub use feedback::{ingest_feedback, IngestOutcome};
pub use queue::{create_generation_queue, run_worker_pool, GenerationJob, StoryDriver, QUEUE_CAPACITY};
pub use scheduler::LoopScheduler;
pub use service::{GenerationStatus, PremiseRef, StoryService};
pub use sweeper::{run_sweeper, sweep_once, SweepSummary};
