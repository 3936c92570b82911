//! Configuration section structs and their serde default functions.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// LLM provider configuration.
///
/// Three model roles are distinguished so a deployment can run cheap
/// models for extraction/validation and a stronger model for prose.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider backend: "anthropic", "openai", or "ollama".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key for cloud providers.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL override (mainly for Ollama and tests).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model used for chapter/bible/arc prose generation.
    #[serde(default = "default_model_generation")]
    pub model_generation: String,

    /// Model used for constraint validation and quality review.
    #[serde(default = "default_model_validation")]
    pub model_validation: String,

    /// Model used for constraint/entity extraction and the editor brief.
    #[serde(default = "default_model_extraction")]
    pub model_extraction: String,

    /// Per-call wall-clock deadline in seconds. Sized for chapter-length
    /// responses.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per call on transient transport errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            base_url: None,
            model_generation: default_model_generation(),
            model_validation: default_model_validation(),
            model_extraction: default_model_extraction(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model_generation() -> String {
    "claude-sonnet-4-5-20250514".to_string()
}

fn default_model_validation() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_model_extraction() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Data storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.storyloom/storyloom.db".to_string()
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Chapter generation pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Regeneration attempts per chapter on a hard FAIL (scanner or
    /// constraint validator).
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,

    /// Lower bound of the accepted chapter word band.
    #[serde(default = "default_word_count_min")]
    pub word_count_min: u32,

    /// Upper bound of the accepted chapter word band.
    #[serde(default = "default_word_count_max")]
    pub word_count_max: u32,

    /// Accepted deviation from the outline's word-count target, percent.
    #[serde(default = "default_word_tolerance_pct")]
    pub word_tolerance_pct: u32,

    /// Minimum weighted quality-review score to pass.
    #[serde(default = "default_quality_pass_threshold")]
    pub quality_pass_threshold: f64,

    /// Whether a soft quality-review FAIL consumes a regeneration attempt.
    #[serde(default)]
    pub regenerate_on_quality_fail: bool,

    /// Target reading level woven into generation prompts.
    #[serde(default = "default_reading_level")]
    pub reading_level: String,

    /// How many of the most recent chapters contribute their opening and
    /// closing hooks to the next chapter's prompt. Key events of every
    /// committed chapter are always included.
    #[serde(default = "default_hook_window")]
    pub hook_window: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_regenerations: default_max_regenerations(),
            word_count_min: default_word_count_min(),
            word_count_max: default_word_count_max(),
            word_tolerance_pct: default_word_tolerance_pct(),
            quality_pass_threshold: default_quality_pass_threshold(),
            regenerate_on_quality_fail: false,
            reading_level: default_reading_level(),
            hook_window: default_hook_window(),
        }
    }
}

fn default_max_regenerations() -> u32 {
    3
}

fn default_word_count_min() -> u32 {
    1800
}

fn default_word_count_max() -> u32 {
    4200
}

fn default_word_tolerance_pct() -> u32 {
    20
}

fn default_quality_pass_threshold() -> f64 {
    7.0
}

fn default_reading_level() -> String {
    "young adult".to_string()
}

fn default_hook_window() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Prose scanner
// ---------------------------------------------------------------------------

/// Per-pattern limits for the deterministic prose scanner.
///
/// A chapter exceeding any limit fails the scan and is regenerated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    /// Maximum em-dashes per chapter.
    #[serde(default = "default_em_dash_max")]
    pub em_dash_max: u32,

    /// Maximum "not X, but Y" constructions per chapter.
    #[serde(default = "default_not_but_max")]
    pub not_but_max: u32,

    /// Maximum "something in X" constructions per chapter.
    #[serde(default = "default_something_in_max")]
    pub something_in_max: u32,

    /// Maximum "the kind of X that Y" constructions per chapter.
    #[serde(default = "default_kind_of_that_max")]
    pub kind_of_that_max: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            em_dash_max: default_em_dash_max(),
            not_but_max: default_not_but_max(),
            something_in_max: default_something_in_max(),
            kind_of_that_max: default_kind_of_that_max(),
        }
    }
}

fn default_em_dash_max() -> u32 {
    3
}

fn default_not_but_max() -> u32 {
    2
}

fn default_something_in_max() -> u32 {
    2
}

fn default_kind_of_that_max() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

/// Self-healing sweeper settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweeperConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweeper_interval")]
    pub interval_secs: u64,

    /// A `generating_*` story whose last update is older than this many
    /// seconds is considered stalled.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Circuit breaker: recovery attempts before a story is marked
    /// permanently failed.
    #[serde(default = "default_max_recovery_retries")]
    pub max_recovery_retries: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweeper_interval(),
            staleness_secs: default_staleness_secs(),
            max_recovery_retries: default_max_recovery_retries(),
        }
    }
}

fn default_sweeper_interval() -> u64 {
    300
}

fn default_staleness_secs() -> u64 {
    3600
}

fn default_max_recovery_retries() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Worker pool and concurrency settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Maximum number of stories generating concurrently.
    #[serde(default = "default_concurrent_stories")]
    pub concurrent_stories: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrent_stories: default_concurrent_stories(),
        }
    }
}

fn default_concurrent_stories() -> usize {
    4
}
