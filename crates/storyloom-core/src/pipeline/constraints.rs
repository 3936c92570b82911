//! Constraint engine: Pass 1 extraction and Pass 3 validation.
//!
//! Pass 1 turns the arc's planned beats and accumulated canon into three
//! bounded lists (`must`, `must_not`, `should`). Pass 3 re-reads the
//! generated chapter against those lists and produces a categorical
//! PASS/FAIL verdict that drives bounded regeneration. Separating mandatory
//! from aspirational constraints keeps the verdict from overfitting to
//! stylistic suggestions.

use super::{complete_structured, PipelineError};
use crate::llm::{GenerationParams, LlmGateway};
use crate::storage::ledgers::LedgerEntry;
use crate::storage::DbPool;
use crate::story::ChapterOutline;
use serde::{Deserialize, Serialize};

/// Bounds on the constraint lists; keeps downstream prompts finite.
const MUST_MAX: usize = 8;
const MUST_MIN: usize = 3;
const MUST_NOT_MAX: usize = 5;
const MUST_NOT_MIN: usize = 2;
const SHOULD_MAX: usize = 5;

/// One extracted constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintItem {
    /// Unique id within the chapter (e.g. `must_1`).
    pub id: String,
    /// Specific, actionable statement.
    pub statement: String,
    /// Citation to the source that produced it (e.g. `arc_events_summary`,
    /// `arc_key_revelations`, `world_ledger`, `prior_key_events`).
    pub source: String,
}

/// The Pass-1 output for one chapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterConstraints {
    /// Non-negotiable requirements from the arc's planned beats.
    pub must: Vec<ConstraintItem>,
    /// Contradictions to avoid, from established facts and world rules.
    pub must_not: Vec<ConstraintItem>,
    /// Soft targets: callbacks, recommended emotional beats.
    pub should: Vec<ConstraintItem>,
}

impl ChapterConstraints {
    /// Clamp list sizes to their upper bounds and warn when a list came
    /// back under its lower bound. Underpopulated lists are accepted so
    /// the pipeline keeps moving.
    pub fn enforce_bounds(&mut self, chapter_number: u32) {
        self.must.truncate(MUST_MAX);
        self.must_not.truncate(MUST_NOT_MAX);
        self.should.truncate(SHOULD_MAX);
        if self.must.len() < MUST_MIN || self.must_not.len() < MUST_NOT_MIN {
            tracing::warn!(
                chapter = chapter_number,
                must = self.must.len(),
                must_not = self.must_not.len(),
                "constraint extraction came back under-populated"
            );
        }
    }

    /// Render as the XML block the generation prompt embeds.
    pub fn to_xml(&self) -> String {
        let render = |tag: &str, items: &[ConstraintItem]| -> String {
            items
                .iter()
                .map(|item| {
                    format!(
                        "  <{tag} id=\"{}\" source=\"{}\">{}</{tag}>",
                        item.id, item.source, item.statement
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "<chapter_constraints>\n{}\n{}\n{}\n</chapter_constraints>",
            render("must", &self.must),
            render("must_not", &self.must_not),
            render("should", &self.should),
        )
    }
}

/// Status of one `must` constraint after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MustStatus {
    Delivered,
    NotDelivered,
}

/// Status of one `must_not` constraint after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MustNotStatus {
    Clear,
    Violated,
}

/// Validation finding for a `must` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MustFinding {
    /// Constraint id.
    pub id: String,
    /// DELIVERED or NOT_DELIVERED.
    pub status: MustStatus,
    /// Evidence quote when delivered.
    #[serde(default)]
    pub evidence: Option<String>,
}

/// Validation finding for a `must_not` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MustNotFinding {
    /// Constraint id.
    pub id: String,
    /// CLEAR or VIOLATED.
    pub status: MustNotStatus,
    /// Evidence quote when violated.
    #[serde(default)]
    pub evidence: Option<String>,
}

/// Informational note on a `should` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShouldNote {
    /// Constraint id.
    pub id: String,
    /// How the chapter handled it.
    pub note: String,
}

/// Categorical validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// The Pass-3 output for one generated chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintReport {
    /// One finding per `must` constraint.
    pub must: Vec<MustFinding>,
    /// One finding per `must_not` constraint.
    pub must_not: Vec<MustNotFinding>,
    /// Informational notes on `should` constraints.
    #[serde(default)]
    pub should: Vec<ShouldNote>,
    /// Scenes or passages to revise, set on FAIL.
    #[serde(default)]
    pub specific_issues: Vec<String>,
}

impl ConstraintReport {
    /// Derive the verdict: PASS iff every `must` is DELIVERED and every
    /// `must_not` is CLEAR. Computed here rather than trusted from the
    /// model.
    pub fn verdict(&self) -> Verdict {
        let all_delivered = self.must.iter().all(|f| f.status == MustStatus::Delivered);
        let all_clear = self
            .must_not
            .iter()
            .all(|f| f.status == MustNotStatus::Clear);
        if all_delivered && all_clear {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    /// Fill in findings the model omitted: a missing `must` finding counts
    /// as NOT_DELIVERED, a missing `must_not` finding as CLEAR.
    pub fn normalize(&mut self, constraints: &ChapterConstraints) {
        for item in &constraints.must {
            if !self.must.iter().any(|f| f.id == item.id) {
                self.must.push(MustFinding {
                    id: item.id.clone(),
                    status: MustStatus::NotDelivered,
                    evidence: None,
                });
            }
        }
        for item in &constraints.must_not {
            if !self.must_not.iter().any(|f| f.id == item.id) {
                self.must_not.push(MustNotFinding {
                    id: item.id.clone(),
                    status: MustNotStatus::Clear,
                    evidence: None,
                });
            }
        }
    }

    /// Failure summary for the regeneration prompt.
    pub fn failure_summary(&self, constraints: &ChapterConstraints) -> String {
        let mut lines = Vec::new();
        for finding in &self.must {
            if finding.status == MustStatus::NotDelivered {
                let statement = constraints
                    .must
                    .iter()
                    .find(|c| c.id == finding.id)
                    .map_or("", |c| c.statement.as_str());
                lines.push(format!("missing required beat [{}]: {statement}", finding.id));
            }
        }
        for finding in &self.must_not {
            if finding.status == MustNotStatus::Violated {
                let statement = constraints
                    .must_not
                    .iter()
                    .find(|c| c.id == finding.id)
                    .map_or("", |c| c.statement.as_str());
                let evidence = finding.evidence.as_deref().unwrap_or("");
                lines.push(format!(
                    "contradiction [{}]: {statement} (evidence: {evidence})",
                    finding.id
                ));
            }
        }
        lines.extend(self.specific_issues.iter().cloned());
        lines.join("\n")
    }
}

/// Inputs to Pass-1 extraction.
pub struct ExtractionContext<'a> {
    /// The chapter being planned.
    pub outline: &'a ChapterOutline,
    /// `(chapter_number, key_events)` for every committed chapter.
    pub previous_key_events: &'a [(u32, Vec<String>)],
    /// Recent character-ledger entries, newest first.
    pub character_entries: &'a [LedgerEntry],
    /// Recent world-ledger entries, newest first.
    pub world_entries: &'a [LedgerEntry],
    /// The bible's world rules.
    pub world_rules: &'a [String],
}

const EXTRACTION_SYSTEM: &str = "You are a story continuity analyst. You turn a chapter outline \
and established canon into precise generation constraints. You respond with JSON only.";

fn extraction_prompt(ctx: &ExtractionContext<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(&super::prompts::outline_block(ctx.outline, None));
    if !ctx.previous_key_events.is_empty() {
        prompt.push_str("\nESTABLISHED EVENTS:\n");
        for (chapter, events) in ctx.previous_key_events {
            for event in events {
                prompt.push_str(&format!("- (ch {chapter}) {event}\n"));
            }
        }
    }
    if !ctx.world_rules.is_empty() {
        prompt.push_str("\nWORLD RULES:\n");
        for rule in ctx.world_rules {
            prompt.push_str(&format!("- {rule}\n"));
        }
    }
    for (label, entries) in [
        ("CHARACTER STATE", ctx.character_entries),
        ("WORLD STATE", ctx.world_entries),
    ] {
        if !entries.is_empty() {
            prompt.push_str(&format!("\n{label}:\n"));
            for entry in entries {
                prompt.push_str(&format!("- (ch {}) {}\n", entry.chapter_number, entry.entry));
            }
        }
    }
    prompt.push_str(
        "\nDerive constraints for this chapter:\n\
         - \"must\": 3-8 non-negotiable requirements from the planned beats. Each needs a unique \
         id (must_1, must_2, ...), a specific actionable statement, and a source citation \
         (arc_events_summary, arc_key_revelations, arc_chapter_hook, prior_key_events, \
         character_ledger, world_ledger, world_rules).\n\
         - \"must_not\": 2-5 contradictions to avoid, drawn from established facts and world \
         rules, ids must_not_1...\n\
         - \"should\": 2-5 soft targets (callbacks, recommended emotional beats), ids should_1...\n\
         Respond with a JSON object {\"must\": [...], \"must_not\": [...], \"should\": [...]} \
         where every item is {\"id\", \"statement\", \"source\"}.",
    );
    prompt
}

/// Pass 1: derive the constraint lists for a chapter.
pub async fn extract_constraints(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    ctx: &ExtractionContext<'_>,
) -> Result<ChapterConstraints, PipelineError> {
    let mut constraints: ChapterConstraints = complete_structured(
        db,
        gateway,
        user_id,
        "constraints",
        EXTRACTION_SYSTEM,
        &extraction_prompt(ctx),
        &GenerationParams {
            max_tokens: 2048,
            temperature: 0.3,
            system_prompt: None,
        },
        "object with arrays 'must', 'must_not', 'should'",
    )
    .await?;

    constraints.enforce_bounds(ctx.outline.chapter_number);
    tracing::debug!(
        chapter = ctx.outline.chapter_number,
        must = constraints.must.len(),
        must_not = constraints.must_not.len(),
        should = constraints.should.len(),
        "constraints extracted"
    );
    Ok(constraints)
}

const VALIDATION_SYSTEM: &str = "You are a meticulous story validator. You check a chapter \
against explicit constraints and cite evidence. You respond with JSON only.";

fn validation_prompt(chapter_text: &str, constraints: &ChapterConstraints) -> String {
    format!(
        "CONSTRAINTS:\n{xml}\n\nCHAPTER TEXT:\n{chapter_text}\n\n\
         For each \"must\" constraint, search the chapter for evidence. Mark it DELIVERED with a \
         short supporting quote, or NOT_DELIVERED.\n\
         For each \"must_not\" constraint, mark it CLEAR, or VIOLATED with the offending quote.\n\
         For each \"should\" constraint, add a one-line informational note.\n\
         If anything is NOT_DELIVERED or VIOLATED, list the scenes or passages to revise in \
         \"specific_issues\".\n\
         Respond with a JSON object {{\"must\": [{{\"id\", \"status\", \"evidence\"}}], \
         \"must_not\": [{{\"id\", \"status\", \"evidence\"}}], \
         \"should\": [{{\"id\", \"note\"}}], \"specific_issues\": []}}.",
        xml = constraints.to_xml(),
    )
}

/// Pass 3: validate a generated chapter against its constraints.
pub async fn validate_chapter(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    chapter_text: &str,
    constraints: &ChapterConstraints,
) -> Result<ConstraintReport, PipelineError> {
    let mut report: ConstraintReport = complete_structured(
        db,
        gateway,
        user_id,
        "constraint_validation",
        VALIDATION_SYSTEM,
        &validation_prompt(chapter_text, constraints),
        &GenerationParams {
            max_tokens: 2048,
            temperature: 0.0,
            system_prompt: None,
        },
        "object with arrays 'must', 'must_not', 'should', 'specific_issues'",
    )
    .await?;

    report.normalize(constraints);
    tracing::debug!(verdict = ?report.verdict(), "constraint validation complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{gateway, ScriptedProvider};
    use crate::storage::init_test_db;
    use std::sync::Arc;

    fn item(id: &str) -> ConstraintItem {
        ConstraintItem {
            id: id.to_string(),
            statement: format!("statement for {id}"),
            source: "arc_events_summary".to_string(),
        }
    }

    fn constraints() -> ChapterConstraints {
        ChapterConstraints {
            must: vec![item("must_1"), item("must_2"), item("must_3")],
            must_not: vec![item("must_not_1"), item("must_not_2")],
            should: vec![item("should_1"), item("should_2")],
        }
    }

    fn outline() -> ChapterOutline {
        ChapterOutline {
            chapter_number: 4,
            title: "The Reef".to_string(),
            events_summary: "Mara dives the reef".to_string(),
            character_focus: "Mara".to_string(),
            tension_level: 6,
            word_count_target: 2500,
            key_revelations: vec![],
            emotional_arc: "doubt to anger".to_string(),
            chapter_hook: "a light below".to_string(),
        }
    }

    #[test]
    fn verdict_pass_requires_all_delivered_and_clear() {
        let report = ConstraintReport {
            must: vec![MustFinding {
                id: "must_1".to_string(),
                status: MustStatus::Delivered,
                evidence: Some("quote".to_string()),
            }],
            must_not: vec![MustNotFinding {
                id: "must_not_1".to_string(),
                status: MustNotStatus::Clear,
                evidence: None,
            }],
            should: vec![],
            specific_issues: vec![],
        };
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn verdict_fail_on_any_not_delivered() {
        let report = ConstraintReport {
            must: vec![
                MustFinding {
                    id: "must_1".to_string(),
                    status: MustStatus::Delivered,
                    evidence: None,
                },
                MustFinding {
                    id: "must_2".to_string(),
                    status: MustStatus::NotDelivered,
                    evidence: None,
                },
            ],
            must_not: vec![],
            should: vec![],
            specific_issues: vec![],
        };
        assert_eq!(report.verdict(), Verdict::Fail);
    }

    #[test]
    fn verdict_fail_on_any_violation() {
        let report = ConstraintReport {
            must: vec![],
            must_not: vec![MustNotFinding {
                id: "must_not_1".to_string(),
                status: MustNotStatus::Violated,
                evidence: Some("the warden smiled warmly".to_string()),
            }],
            should: vec![],
            specific_issues: vec![],
        };
        assert_eq!(report.verdict(), Verdict::Fail);
    }

    #[test]
    fn normalize_fills_missing_findings() {
        let mut report = ConstraintReport {
            must: vec![],
            must_not: vec![],
            should: vec![],
            specific_issues: vec![],
        };
        report.normalize(&constraints());
        assert_eq!(report.must.len(), 3);
        assert!(report.must.iter().all(|f| f.status == MustStatus::NotDelivered));
        assert_eq!(report.must_not.len(), 2);
        assert!(report
            .must_not
            .iter()
            .all(|f| f.status == MustNotStatus::Clear));
        assert_eq!(report.verdict(), Verdict::Fail);
    }

    #[test]
    fn enforce_bounds_truncates() {
        let mut constraints = ChapterConstraints {
            must: (0..12).map(|i| item(&format!("must_{i}"))).collect(),
            must_not: (0..9).map(|i| item(&format!("must_not_{i}"))).collect(),
            should: (0..9).map(|i| item(&format!("should_{i}"))).collect(),
        };
        constraints.enforce_bounds(1);
        assert_eq!(constraints.must.len(), 8);
        assert_eq!(constraints.must_not.len(), 5);
        assert_eq!(constraints.should.len(), 5);
    }

    #[test]
    fn xml_contains_every_item() {
        let xml = constraints().to_xml();
        assert!(xml.contains("<chapter_constraints>"));
        assert!(xml.contains("id=\"must_1\""));
        assert!(xml.contains("id=\"must_not_2\""));
        assert!(xml.contains("source=\"arc_events_summary\""));
    }

    #[test]
    fn failure_summary_names_issues() {
        let mut report = ConstraintReport {
            must: vec![MustFinding {
                id: "must_1".to_string(),
                status: MustStatus::NotDelivered,
                evidence: None,
            }],
            must_not: vec![MustNotFinding {
                id: "must_not_1".to_string(),
                status: MustNotStatus::Violated,
                evidence: Some("bad quote".to_string()),
            }],
            should: vec![],
            specific_issues: vec!["rework the dive scene".to_string()],
        };
        report.normalize(&constraints());
        let summary = report.failure_summary(&constraints());
        assert!(summary.contains("statement for must_1"));
        assert!(summary.contains("bad quote"));
        assert!(summary.contains("rework the dive scene"));
    }

    #[tokio::test]
    async fn extraction_round_trip_through_scripted_model() {
        let db = init_test_db().await.expect("db");
        let response = serde_json::json!({
            "must": [
                {"id": "must_1", "statement": "Mara dives the reef", "source": "arc_events_summary"},
                {"id": "must_2", "statement": "The light below is seen", "source": "arc_chapter_hook"},
                {"id": "must_3", "statement": "Anger replaces doubt", "source": "arc_events_summary"}
            ],
            "must_not": [
                {"id": "must_not_1", "statement": "Do not reveal the warden's secret", "source": "world_ledger"},
                {"id": "must_not_2", "statement": "The tide cannot follow a clock", "source": "world_rules"}
            ],
            "should": [
                {"id": "should_1", "statement": "Call back the bell from chapter 1", "source": "prior_key_events"},
                {"id": "should_2", "statement": "Let Tobin doubt her", "source": "character_ledger"}
            ]
        });
        let provider = Arc::new(ScriptedProvider::always(&response.to_string()));
        let gw = gateway(provider);

        let outline = outline();
        let ctx = ExtractionContext {
            outline: &outline,
            previous_key_events: &[(1, vec!["the bell tolled".to_string()])],
            character_entries: &[],
            world_entries: &[],
            world_rules: &["the tide obeys no clock".to_string()],
        };
        let constraints = extract_constraints(&db, &gw, "u1", &ctx).await.expect("extract");
        assert_eq!(constraints.must.len(), 3);
        assert_eq!(constraints.must_not.len(), 2);
    }

    #[tokio::test]
    async fn validation_round_trip_derives_verdict() {
        let db = init_test_db().await.expect("db");
        let response = serde_json::json!({
            "must": [
                {"id": "must_1", "status": "DELIVERED", "evidence": "she dove"},
                {"id": "must_2", "status": "DELIVERED", "evidence": "a light below"},
                {"id": "must_3", "status": "DELIVERED", "evidence": "her fists closed"}
            ],
            "must_not": [
                {"id": "must_not_1", "status": "CLEAR"},
                {"id": "must_not_2", "status": "CLEAR"}
            ],
            "should": [{"id": "should_1", "note": "bell callback landed"}],
            "specific_issues": []
        });
        let provider = Arc::new(ScriptedProvider::always(&response.to_string()));
        let gw = gateway(provider);

        let report = validate_chapter(&db, &gw, "u1", "chapter text", &constraints())
            .await
            .expect("validate");
        assert_eq!(report.verdict(), Verdict::Pass);
    }
}
