//! Generation step tags and the durable progress blob.
//!
//! `GenerationStep` is the typed form of the `current_step` string stored
//! on every story row; `GenerationProgress` is the JSON blob written after
//! every stage transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of chapters in a book.
pub const CHAPTER_COUNT: u32 = 12;

/// Checkpoint chapters at which reader feedback gates the next batch.
pub const CHECKPOINT_CHAPTERS: [u32; 3] = [2, 5, 8];

/// A stage of the per-story state machine.
///
/// The wire form is the exact string tag stored in
/// `generation_progress.current_step` (e.g. `generating_chapter_7`,
/// `awaiting_chapter_5_feedback`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStep {
    /// Generating the story bible.
    GeneratingBible,
    /// Generating the twelve-chapter arc.
    GeneratingArc,
    /// Generating chapter N (1..=12).
    GeneratingChapter(u32),
    /// Blocked on reader feedback for the given checkpoint chapter (2, 5, 8).
    AwaitingFeedback(u32),
    /// Terminal success: all twelve chapters committed.
    Chapter12Complete,
    /// Terminal failure: the circuit breaker fired.
    PermanentlyFailed,
}

impl GenerationStep {
    /// The string tag stored in the database.
    pub fn as_tag(&self) -> String {
        match self {
            GenerationStep::GeneratingBible => "generating_bible".to_string(),
            GenerationStep::GeneratingArc => "generating_arc".to_string(),
            GenerationStep::GeneratingChapter(n) => format!("generating_chapter_{n}"),
            GenerationStep::AwaitingFeedback(n) => format!("awaiting_chapter_{n}_feedback"),
            GenerationStep::Chapter12Complete => "chapter_12_complete".to_string(),
            GenerationStep::PermanentlyFailed => "permanently_failed".to_string(),
        }
    }

    /// Parse a stored tag. Returns `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "generating_bible" => return Some(GenerationStep::GeneratingBible),
            "generating_arc" => return Some(GenerationStep::GeneratingArc),
            "chapter_12_complete" => return Some(GenerationStep::Chapter12Complete),
            "permanently_failed" => return Some(GenerationStep::PermanentlyFailed),
            _ => {}
        }
        if let Some(n) = tag.strip_prefix("generating_chapter_") {
            let n: u32 = n.parse().ok()?;
            if (1..=CHAPTER_COUNT).contains(&n) {
                return Some(GenerationStep::GeneratingChapter(n));
            }
            return None;
        }
        if let Some(rest) = tag.strip_prefix("awaiting_chapter_") {
            let n: u32 = rest.strip_suffix("_feedback")?.parse().ok()?;
            if CHECKPOINT_CHAPTERS.contains(&n) {
                return Some(GenerationStep::AwaitingFeedback(n));
            }
        }
        None
    }

    /// Whether this is a `generating_*` step.
    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            GenerationStep::GeneratingBible
                | GenerationStep::GeneratingArc
                | GenerationStep::GeneratingChapter(_)
        )
    }

    /// Whether this step is terminal (success or failure).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationStep::Chapter12Complete | GenerationStep::PermanentlyFailed
        )
    }

    /// The step entered after chapter `n` commits.
    ///
    /// Chapters 3, 6, and 9 close a batch and block on the checkpoint two
    /// chapters back; chapter 12 completes the book.
    pub fn after_chapter(n: u32) -> Self {
        match n {
            3 | 6 | 9 => GenerationStep::AwaitingFeedback(n - 1),
            12 => GenerationStep::Chapter12Complete,
            _ => GenerationStep::GeneratingChapter(n + 1),
        }
    }
}

impl std::fmt::Display for GenerationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

impl Serialize for GenerationStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_tag())
    }
}

impl<'de> Deserialize<'de> for GenerationStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        GenerationStep::parse(&tag)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown generation step '{tag}'")))
    }
}

/// The durable progress blob written after every stage transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationProgress {
    /// Current stage of the state machine.
    pub current_step: GenerationStep,

    /// Number of committed chapters. Monotonically non-decreasing.
    pub chapters_generated: u32,

    /// First chapter of the batch currently in flight.
    #[serde(default)]
    pub batch_start: Option<u32>,

    /// Last chapter of the batch currently in flight.
    #[serde(default)]
    pub batch_end: Option<u32>,

    /// Sweeper recovery attempts since the last successful transition.
    #[serde(default)]
    pub health_check_retries: u32,

    /// The most recent stage error, if any.
    #[serde(default)]
    pub last_error: Option<String>,

    /// The error the sweeper acted on at its previous recovery attempt.
    /// Used to detect a deterministic failure repeating verbatim.
    #[serde(default)]
    pub prior_error: Option<String>,

    /// When this blob was last written.
    pub last_updated: DateTime<Utc>,
}

impl GenerationProgress {
    /// Initial progress for a freshly selected premise.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_step: GenerationStep::GeneratingBible,
            chapters_generated: 0,
            batch_start: Some(1),
            batch_end: Some(3),
            health_check_retries: 0,
            last_error: None,
            prior_error: None,
            last_updated: now,
        }
    }

    /// Advance to a new step, clearing error bookkeeping.
    pub fn advance(&mut self, step: GenerationStep, now: DateTime<Utc>) {
        self.current_step = step;
        self.health_check_retries = 0;
        self.last_error = None;
        self.prior_error = None;
        self.last_updated = now;
    }

    /// Record a stage failure without moving the step.
    pub fn record_error(&mut self, error: String, now: DateTime<Utc>) {
        self.last_error = Some(error);
        self.last_updated = now;
    }
}
