//! Typed domain model for stories, bibles, arcs, chapters, and premises.
//!
//! These are the in-memory representations; persistence keeps most of them
//! as JSON blob columns for forward compatibility (see `storage`).

pub mod feedback;
pub mod progress;

pub use feedback::{
    normalize_checkpoint, Checkpoint, CheckpointFeedback, DimensionFeedback, FeedbackPayload,
};
pub use progress::{GenerationProgress, GenerationStep, CHAPTER_COUNT, CHECKPOINT_CHAPTERS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Premises
// ---------------------------------------------------------------------------

/// Risk tier of a premise relative to the reader's stated preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiseTier {
    /// Squarely inside the reader's preferences.
    Comfort,
    /// Adjacent to them.
    Stretch,
    /// Deliberately off-profile.
    Wildcard,
}

/// One candidate book premise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Premise {
    /// Working title.
    pub title: String,
    /// Two-to-three sentence description.
    pub description: String,
    /// The one-line hook.
    pub hook: String,
    /// Genre label.
    pub genre: String,
    /// Themes the book would explore.
    pub themes: Vec<String>,
    /// Risk tier.
    pub tier: PremiseTier,
}

/// A generated set of three premises offered to a reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiseSet {
    /// Unique id.
    pub id: String,
    /// The reader this set was generated for.
    pub user_id: String,
    /// Exactly three premises, tiers a permutation of the three values.
    pub premises: Vec<Premise>,
    /// `active` or `discarded`.
    pub status: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl PremiseSet {
    /// Check the structural invariants: exactly three premises whose tiers
    /// are a permutation of {comfort, stretch, wildcard}.
    pub fn validate(&self) -> Result<(), String> {
        if self.premises.len() != 3 {
            return Err(format!("expected 3 premises, got {}", self.premises.len()));
        }
        let mut tiers: Vec<PremiseTier> = self.premises.iter().map(|p| p.tier).collect();
        tiers.sort_by_key(|t| match t {
            PremiseTier::Comfort => 0,
            PremiseTier::Stretch => 1,
            PremiseTier::Wildcard => 2,
        });
        if tiers != [PremiseTier::Comfort, PremiseTier::Stretch, PremiseTier::Wildcard] {
            return Err("premise tiers must be a permutation of comfort/stretch/wildcard".into());
        }
        Ok(())
    }
}

/// Reader preferences that seed premise generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderPreferences {
    /// Preferred genres.
    #[serde(default)]
    pub genres: Vec<String>,
    /// Themes the reader responds to.
    #[serde(default)]
    pub themes: Vec<String>,
    /// Tone preference, free text.
    #[serde(default)]
    pub tone: Option<String>,
    /// Anything else the reader told us.
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Bible
// ---------------------------------------------------------------------------

/// A character card in the story bible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    /// Canonical spelling of the name; every chapter must match it.
    pub name: String,
    /// What they want.
    pub goals: String,
    /// What they fear.
    pub fears: String,
    /// How they speak.
    pub voice: String,
    /// Internal contradictions that make them move.
    pub contradictions: String,
}

/// A key location with sensory grounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    /// Location name.
    pub name: String,
    /// Sensory details the prose should draw from.
    pub sensory_details: String,
}

/// The canonical structured description of a book.
///
/// Written once per story and treated as immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bible {
    /// The protagonist.
    pub protagonist: Character,
    /// The antagonist.
    pub antagonist: Character,
    /// Supporting cast.
    #[serde(default)]
    pub supporting: Vec<Character>,
    /// Hard rules of the world.
    #[serde(default)]
    pub world_rules: Vec<String>,
    /// The central conflict.
    pub central_conflict: String,
    /// What is at stake.
    pub stakes: String,
    /// Themes.
    #[serde(default)]
    pub themes: Vec<String>,
    /// Key locations.
    #[serde(default)]
    pub key_locations: Vec<Location>,
    /// Timeline of events preceding and spanning the book.
    #[serde(default)]
    pub timeline: String,
}

impl Bible {
    /// All character names, protagonist first.
    pub fn character_names(&self) -> Vec<&str> {
        let mut names = vec![self.protagonist.name.as_str(), self.antagonist.name.as_str()];
        names.extend(self.supporting.iter().map(|c| c.name.as_str()));
        names
    }

    /// Check that character names are unique within the bible.
    pub fn validate(&self) -> Result<(), String> {
        let names = self.character_names();
        let mut seen = std::collections::HashSet::new();
        for name in &names {
            if !seen.insert(name.to_lowercase()) {
                return Err(format!("duplicate character name '{name}' in bible"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Arc
// ---------------------------------------------------------------------------

/// Planned beats for one chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterOutline {
    /// Chapter number, 1..=12.
    pub chapter_number: u32,
    /// Chapter title.
    pub title: String,
    /// What happens.
    pub events_summary: String,
    /// Whose chapter this is.
    pub character_focus: String,
    /// Tension on a 1-10 scale.
    pub tension_level: u32,
    /// Target word count.
    pub word_count_target: u32,
    /// Revelations the chapter must land.
    #[serde(default)]
    pub key_revelations: Vec<String>,
    /// The emotional movement of the chapter.
    pub emotional_arc: String,
    /// The hook that ends the chapter.
    pub chapter_hook: String,
}

/// The twelve-chapter outline of a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArcOutline {
    /// Ordered chapter outlines.
    pub chapters: Vec<ChapterOutline>,
}

impl ArcOutline {
    /// Check the structural invariants: twelve chapters whose numbers are a
    /// permutation of 1..=12, with word targets inside the configured band.
    pub fn validate(&self, word_min: u32, word_max: u32) -> Result<(), String> {
        if self.chapters.len() != CHAPTER_COUNT as usize {
            return Err(format!(
                "expected {CHAPTER_COUNT} chapter outlines, got {}",
                self.chapters.len()
            ));
        }
        let mut numbers: Vec<u32> = self.chapters.iter().map(|c| c.chapter_number).collect();
        numbers.sort_unstable();
        if numbers != (1..=CHAPTER_COUNT).collect::<Vec<_>>() {
            return Err("chapter numbers must be a permutation of 1..=12".into());
        }
        for outline in &self.chapters {
            if outline.word_count_target < word_min || outline.word_count_target > word_max {
                return Err(format!(
                    "chapter {} word target {} outside [{word_min}, {word_max}]",
                    outline.chapter_number, outline.word_count_target
                ));
            }
        }
        Ok(())
    }

    /// The outline for a chapter number, if present.
    pub fn chapter(&self, number: u32) -> Option<&ChapterOutline> {
        self.chapters.iter().find(|c| c.chapter_number == number)
    }

    /// Outlines for an inclusive chapter range, ordered by number.
    pub fn range(&self, start: u32, end: u32) -> Vec<&ChapterOutline> {
        let mut outlines: Vec<&ChapterOutline> = self
            .chapters
            .iter()
            .filter(|c| c.chapter_number >= start && c.chapter_number <= end)
            .collect();
        outlines.sort_by_key(|c| c.chapter_number);
        outlines
    }
}

// ---------------------------------------------------------------------------
// Chapters
// ---------------------------------------------------------------------------

/// A committed chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// Unique id.
    pub id: String,
    /// Owning story.
    pub story_id: String,
    /// 1..=12.
    pub chapter_number: u32,
    /// Chapter title.
    pub title: String,
    /// The prose.
    pub content: String,
    /// Word count of `content`.
    pub word_count: u32,
    /// Weighted quality-review score.
    pub quality_score: Option<f64>,
    /// How many times generation was retried before commit.
    pub regeneration_count: u32,
    /// Raw quality review, JSON.
    pub quality_review: Option<serde_json::Value>,
    /// Raw constraint validation report, JSON.
    pub constraint_report: Option<serde_json::Value>,
    /// The opening hook sentence(s).
    pub opening_hook: String,
    /// The closing hook sentence(s).
    pub closing_hook: String,
    /// Key events, used by later chapters' prompts.
    pub key_events: Vec<String>,
    /// Set when the regeneration budget ran out and the best attempt was
    /// committed anyway.
    pub flagged: bool,
    /// Commit time.
    pub created_at: DateTime<Utc>,
    /// Set when a surgical revision replaced the content.
    pub revised_at: Option<DateTime<Utc>>,
}

/// Compact chapter view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterSummary {
    /// 1..=12.
    pub chapter_number: u32,
    /// Chapter title.
    pub title: String,
    /// Word count.
    pub word_count: u32,
    /// Weighted quality score, if reviewed.
    pub quality_score: Option<f64>,
    /// Whether the chapter committed via the exhausted branch.
    pub flagged: bool,
}

// ---------------------------------------------------------------------------
// Entities and ledgers
// ---------------------------------------------------------------------------

/// Kind of fact extracted from a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Location,
    WorldRule,
    Timeline,
    PlotThread,
}

impl EntityType {
    /// The stored tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            EntityType::Character => "character",
            EntityType::Location => "location",
            EntityType::WorldRule => "world_rule",
            EntityType::Timeline => "timeline",
            EntityType::PlotThread => "plot_thread",
        }
    }

    /// Parse a stored tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "character" => Some(EntityType::Character),
            "location" => Some(EntityType::Location),
            "world_rule" => Some(EntityType::WorldRule),
            "timeline" => Some(EntityType::Timeline),
            "plot_thread" => Some(EntityType::PlotThread),
            _ => None,
        }
    }
}

/// A fact extracted from a committed chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterEntity {
    /// Owning chapter.
    pub chapter_id: String,
    /// Owning story.
    pub story_id: String,
    /// Chapter number the fact came from.
    pub chapter_number: u32,
    /// Kind of fact.
    pub entity_type: EntityType,
    /// Who or what the fact is about.
    pub entity_name: String,
    /// The fact itself.
    pub fact: String,
    /// Supporting quote from the chapter.
    pub source_quote: String,
    /// Whether the fact is consistent with prior canon.
    pub is_consistent: bool,
}

// ---------------------------------------------------------------------------
// Editor brief
// ---------------------------------------------------------------------------

/// A revised outline for one upcoming chapter, woven from reader feedback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisedOutline {
    /// Chapter number the revision applies to.
    pub chapter_number: u32,
    /// The rewritten events summary.
    pub events_summary: String,
    /// Editor notes naming specific characters and beats.
    pub editor_notes: String,
}

/// The artifact the editor-brief builder produces for one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditorBrief {
    /// First chapter of the batch.
    pub batch_start: u32,
    /// One revised outline per chapter in the batch.
    pub revised_outlines: Vec<RevisedOutline>,
    /// An 80-120 word prose passage demonstrating the corrected voice.
    pub style_example: String,
}

impl EditorBrief {
    /// The revised outline for a chapter, if the brief contains one.
    pub fn outline_for(&self, chapter_number: u32) -> Option<&RevisedOutline> {
        self.revised_outlines
            .iter()
            .find(|o| o.chapter_number == chapter_number)
    }
}

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

/// Lifecycle status of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Generating,
    Active,
    Completed,
    Abandoned,
    Error,
    Archived,
}

impl StoryStatus {
    /// The stored tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            StoryStatus::Generating => "generating",
            StoryStatus::Active => "active",
            StoryStatus::Completed => "completed",
            StoryStatus::Abandoned => "abandoned",
            StoryStatus::Error => "error",
            StoryStatus::Archived => "archived",
        }
    }

    /// Parse a stored tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "generating" => Some(StoryStatus::Generating),
            "active" => Some(StoryStatus::Active),
            "completed" => Some(StoryStatus::Completed),
            "abandoned" => Some(StoryStatus::Abandoned),
            "error" => Some(StoryStatus::Error),
            "archived" => Some(StoryStatus::Archived),
            _ => None,
        }
    }

    /// Whether no further generation will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StoryStatus::Completed | StoryStatus::Abandoned | StoryStatus::Error
        )
    }
}

/// A story row.
#[derive(Debug, Clone)]
pub struct Story {
    /// Unique id.
    pub id: String,
    /// The reader who owns it.
    pub user_id: String,
    /// Book title (from the selected premise).
    pub title: String,
    /// Genre label.
    pub genre: String,
    /// Lifecycle status.
    pub status: StoryStatus,
    /// The premise the reader selected.
    pub premise: Premise,
    /// Durable progress blob.
    pub progress: GenerationProgress,
    /// Series linkage, if any.
    pub series_id: Option<String>,
    /// Book number within the series.
    pub book_number: Option<i64>,
    /// Cover image URL once the external cover service has produced one.
    pub cover_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time (matches `progress.last_updated` on progress writes).
    pub updated_at: DateTime<Utc>,
}
