//! Checkpoint feedback: canonical checkpoints, legacy normalization,
//! and the feedback payload sum type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::GenerationStep;

/// Dimension values treated as "no correction needed".
pub const POSITIVE_PACING: &str = "hooked";
pub const POSITIVE_TONE: &str = "right";
pub const POSITIVE_CHARACTER: &str = "love";

/// A point at which reader feedback is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// After chapter 2 (gates chapters 4–6).
    Chapter2,
    /// After chapter 5 (gates chapters 7–9).
    Chapter5,
    /// After chapter 8 (gates chapters 10–12).
    Chapter8,
    /// Recorded when a reader leaves the library; never gates a batch.
    LibraryExit,
}

impl Checkpoint {
    /// The canonical stored tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Checkpoint::Chapter2 => "chapter_2",
            Checkpoint::Chapter5 => "chapter_5",
            Checkpoint::Chapter8 => "chapter_8",
            Checkpoint::LibraryExit => "library_exit",
        }
    }

    /// Parse a canonical tag only (no legacy names).
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "chapter_2" => Some(Checkpoint::Chapter2),
            "chapter_5" => Some(Checkpoint::Chapter5),
            "chapter_8" => Some(Checkpoint::Chapter8),
            "library_exit" => Some(Checkpoint::LibraryExit),
            _ => None,
        }
    }

    /// The chapter batch this checkpoint gates, as `(start, end)` inclusive.
    pub fn batch(&self) -> Option<(u32, u32)> {
        match self {
            Checkpoint::Chapter2 => Some((4, 6)),
            Checkpoint::Chapter5 => Some((7, 9)),
            Checkpoint::Chapter8 => Some((10, 12)),
            Checkpoint::LibraryExit => None,
        }
    }

    /// The `awaiting_*` step released by this checkpoint.
    pub fn awaiting_step(&self) -> Option<GenerationStep> {
        match self {
            Checkpoint::Chapter2 => Some(GenerationStep::AwaitingFeedback(2)),
            Checkpoint::Chapter5 => Some(GenerationStep::AwaitingFeedback(5)),
            Checkpoint::Chapter8 => Some(GenerationStep::AwaitingFeedback(8)),
            Checkpoint::LibraryExit => None,
        }
    }
}

/// Normalize a raw checkpoint name, accepting legacy aliases.
///
/// Early clients reported the checkpoint as the chapter that closed the
/// batch (`chapter_3`, `chapter_6`, `chapter_9`); the canonical names use
/// the checkpoint chapter itself. Normalization is idempotent.
pub fn normalize_checkpoint(raw: &str) -> Option<Checkpoint> {
    match raw {
        "chapter_3" => Some(Checkpoint::Chapter2),
        "chapter_6" => Some(Checkpoint::Chapter5),
        "chapter_9" => Some(Checkpoint::Chapter8),
        other => Checkpoint::parse(other),
    }
}

/// Dimensioned checkpoint feedback.
///
/// Values are open strings from the client (`pacing: "slow"`,
/// `tone: "serious"`, ...); only the positive set is closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionFeedback {
    /// How the pacing lands. Positive value: `hooked`.
    #[serde(default)]
    pub pacing: Option<String>,
    /// How the tone lands. Positive value: `right`.
    #[serde(default)]
    pub tone: Option<String>,
    /// How the characters land. Positive value: `love`.
    #[serde(default)]
    pub character: Option<String>,
}

impl DimensionFeedback {
    /// Whether every present dimension is in the positive set.
    ///
    /// An absent dimension is treated as neutral, not negative.
    pub fn is_all_positive(&self) -> bool {
        let ok = |value: &Option<String>, positive: &str| {
            value.as_deref().map_or(true, |v| v == positive)
        };
        ok(&self.pacing, POSITIVE_PACING)
            && ok(&self.tone, POSITIVE_TONE)
            && ok(&self.character, POSITIVE_CHARACTER)
    }
}

/// The three shapes checkpoint feedback arrives in, plus an explicit skip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackPayload {
    /// Dimensioned quick-tap feedback.
    Dimensions(DimensionFeedback),
    /// Free-form text response.
    FreeForm {
        /// The reader's words, verbatim.
        response: String,
    },
    /// Structured extraction from a voice interview.
    VoiceInterview {
        /// Provider-side extraction, kept opaque.
        extraction: serde_json::Value,
    },
    /// The reader skipped the checkpoint.
    Skipped,
}

impl FeedbackPayload {
    /// Whether this feedback calls for course corrections in the next batch.
    pub fn needs_corrections(&self) -> bool {
        match self {
            FeedbackPayload::Dimensions(dims) => !dims.is_all_positive(),
            FeedbackPayload::FreeForm { response } => !response.trim().is_empty(),
            FeedbackPayload::VoiceInterview { .. } => true,
            FeedbackPayload::Skipped => false,
        }
    }
}

/// A committed checkpoint feedback row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFeedback {
    /// The reader.
    pub user_id: String,
    /// The story.
    pub story_id: String,
    /// Canonical checkpoint.
    #[serde(with = "checkpoint_tag")]
    pub checkpoint: Checkpoint,
    /// What the reader said.
    pub payload: FeedbackPayload,
    /// When the row was (last) written.
    pub created_at: DateTime<Utc>,
}

mod checkpoint_tag {
    use super::Checkpoint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Checkpoint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_tag())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Checkpoint, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Checkpoint::parse(&tag)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown checkpoint '{tag}'")))
    }
}
