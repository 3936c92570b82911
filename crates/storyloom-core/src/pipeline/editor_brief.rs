//! Editor-brief builder.
//!
//! Turns the checkpoint feedback history into revised outlines for the next
//! batch plus a short style exemplar. Corrections are woven into the
//! outline itself rather than appended as a separate block, and the
//! exemplar gives the generator a concrete voice target. The model emits
//! XML because the exemplar embeds quotes and dialogue that are tedious to
//! escape in JSON.
//!
//! This component is non-fatal by contract: any failure logs and returns
//! `None`, and the batch proceeds without corrections.

use super::{prompts, record_usage, word_count, PipelineError};
use crate::llm::{extract, GenerationParams, LlmGateway};
use crate::storage::DbPool;
use crate::story::{CheckpointFeedback, ChapterOutline, EditorBrief, RevisedOutline};
use regex::Regex;
use std::sync::OnceLock;

fn revised_outline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<revised_outline\s+chapter="(\d+)"\s*>(.*?)</revised_outline>"#)
            .expect("revised outline regex must compile")
    })
}

fn events_summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<events_summary>(.*?)</events_summary>")
            .expect("events summary regex must compile")
    })
}

fn editor_notes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<editor_notes>(.*?)</editor_notes>")
            .expect("editor notes regex must compile")
    })
}

fn style_example_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<style_example>(.*?)</style_example>")
            .expect("style example regex must compile")
    })
}

const BRIEF_SYSTEM: &str = "You are the series editor for a serialized novel. A reader has given \
checkpoint feedback; you revise the upcoming chapter outlines so the correction is woven into \
the story itself, and you write one short passage demonstrating the corrected voice.";

fn brief_prompt(
    history: &[CheckpointFeedback],
    batch_outlines: &[&ChapterOutline],
    protagonist: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&prompts::corrections_xml(history));
    prompt.push_str("\n\nUPCOMING OUTLINES:\n");
    for outline in batch_outlines {
        prompt.push_str(&prompts::outline_block(outline, None));
        prompt.push('\n');
    }
    let chapters: Vec<String> = batch_outlines
        .iter()
        .map(|o| o.chapter_number.to_string())
        .collect();
    prompt.push_str(&format!(
        "Rewrite each outline's events_summary so the reader's corrections are addressed inside \
         the story (keep the plot beats; change how they are told). Add editor_notes naming \
         specific characters and specific beats. Then write one style_example of 80-120 words \
         demonstrating the corrected voice, using {protagonist} by name.\n\
         Respond with exactly this XML:\n\
         <editor_brief>\n\
         {outlines}\n  <style_example>...</style_example>\n</editor_brief>",
        outlines = chapters
            .iter()
            .map(|n| format!(
                "  <revised_outline chapter=\"{n}\">\n    <events_summary>...</events_summary>\n    <editor_notes>...</editor_notes>\n  </revised_outline>"
            ))
            .collect::<Vec<_>>()
            .join("\n"),
    ));
    prompt
}

/// Parse the model's XML into an [`EditorBrief`].
///
/// Returns an error when any batch chapter lacks a revised outline or the
/// style example is missing.
pub fn parse_brief_xml(
    xml: &str,
    batch_start: u32,
    batch_chapters: &[u32],
) -> Result<EditorBrief, String> {
    let root = extract::find_xml_root(xml).ok_or("no XML root element found")?;

    let mut revised_outlines = Vec::new();
    for captures in revised_outline_re().captures_iter(root) {
        let chapter_number: u32 = captures[1].parse().map_err(|_| "bad chapter attribute")?;
        let body = &captures[2];
        let events_summary = events_summary_re()
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .ok_or_else(|| format!("chapter {chapter_number} missing events_summary"))?;
        let editor_notes = editor_notes_re()
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        revised_outlines.push(RevisedOutline {
            chapter_number,
            events_summary,
            editor_notes,
        });
    }

    for chapter in batch_chapters {
        if !revised_outlines.iter().any(|o| o.chapter_number == *chapter) {
            return Err(format!("no revised outline for chapter {chapter}"));
        }
    }

    let style_example = style_example_re()
        .captures(root)
        .map(|c| c[1].trim().to_string())
        .ok_or("missing style_example")?;
    if style_example.is_empty() {
        return Err("empty style_example".to_string());
    }

    let words = word_count(&style_example);
    if !(80..=120).contains(&words) {
        tracing::debug!(words = words, "style example outside the 80-120 word target");
    }

    Ok(EditorBrief {
        batch_start,
        revised_outlines,
        style_example,
    })
}

/// Build the editor brief for a batch, or `None` when no corrections are
/// needed or the builder fails.
///
/// Policy: the most recent feedback decides. If every dimension is in the
/// positive set (or the checkpoint was skipped), the batch runs unchanged.
pub async fn build_editor_brief(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    history: &[CheckpointFeedback],
    batch_outlines: &[&ChapterOutline],
    protagonist: &str,
    batch_start: u32,
) -> Result<Option<EditorBrief>, PipelineError> {
    let Some(latest) = history.last() else {
        return Ok(None);
    };
    if !latest.payload.needs_corrections() {
        tracing::debug!(batch_start, "feedback all positive, no editor brief");
        return Ok(None);
    }

    let response = match gateway
        .complete(
            BRIEF_SYSTEM,
            &brief_prompt(history, batch_outlines, protagonist),
            &GenerationParams {
                max_tokens: 4096,
                temperature: 0.7,
                system_prompt: None,
            },
        )
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, batch_start, "editor brief call failed, proceeding without corrections");
            return Ok(None);
        }
    };
    record_usage(db, user_id, "editor_brief", gateway, &response, None).await;

    let batch_chapters: Vec<u32> = batch_outlines.iter().map(|o| o.chapter_number).collect();
    match parse_brief_xml(&response.text, batch_start, &batch_chapters) {
        Ok(brief) => {
            tracing::info!(
                batch_start,
                outlines = brief.revised_outlines.len(),
                "editor brief built"
            );
            Ok(Some(brief))
        }
        Err(problem) => {
            tracing::warn!(
                error = %problem,
                batch_start,
                "editor brief parse failed, proceeding without corrections"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{gateway, ScriptedProvider};
    use crate::storage::arcs::test_fixtures::outline;
    use crate::storage::init_test_db;
    use crate::story::feedback::{Checkpoint, DimensionFeedback, FeedbackPayload};
    use chrono::Utc;
    use std::sync::Arc;

    fn feedback(pacing: &str, tone: &str, character: &str) -> CheckpointFeedback {
        CheckpointFeedback {
            user_id: "u1".to_string(),
            story_id: "s1".to_string(),
            checkpoint: Checkpoint::Chapter2,
            payload: FeedbackPayload::Dimensions(DimensionFeedback {
                pacing: Some(pacing.to_string()),
                tone: Some(tone.to_string()),
                character: Some(character.to_string()),
            }),
            created_at: Utc::now(),
        }
    }

    fn brief_xml() -> String {
        let style = "Mara took the stairs two at a time, counting bells. ".repeat(10);
        format!(
            "<editor_brief>\n\
             <revised_outline chapter=\"4\">\n\
               <events_summary>Mara dives sooner; cut the harbor scene.</events_summary>\n\
               <editor_notes>Open on Mara mid-action; Hollis appears by page two.</editor_notes>\n\
             </revised_outline>\n\
             <revised_outline chapter=\"5\">\n\
               <events_summary>The reef collapse happens on-page.</events_summary>\n\
               <editor_notes>Keep Tobin's doubt visible in dialogue.</editor_notes>\n\
             </revised_outline>\n\
             <revised_outline chapter=\"6\">\n\
               <events_summary>End on the lantern answering from the sea.</events_summary>\n\
               <editor_notes>Shorten interior monologue; \"she said\" beats adverbs.</editor_notes>\n\
             </revised_outline>\n\
             <style_example>{style}</style_example>\n\
             </editor_brief>"
        )
    }

    #[tokio::test]
    async fn all_positive_feedback_yields_none() {
        let db = init_test_db().await.expect("db");
        let provider = Arc::new(ScriptedProvider::always("should never be called"));
        let gw = gateway(provider.clone());

        let outlines = [outline(4), outline(5), outline(6)];
        let refs: Vec<&ChapterOutline> = outlines.iter().collect();
        let brief = build_editor_brief(
            &db,
            &gw,
            "u1",
            &[feedback("hooked", "right", "love")],
            &refs,
            "Mara",
            4,
        )
        .await
        .expect("build");

        assert!(brief.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_history_yields_none() {
        let db = init_test_db().await.expect("db");
        let gw = gateway(Arc::new(ScriptedProvider::always("unused")));
        let outlines = [outline(4)];
        let refs: Vec<&ChapterOutline> = outlines.iter().collect();
        let brief = build_editor_brief(&db, &gw, "u1", &[], &refs, "Mara", 4)
            .await
            .expect("build");
        assert!(brief.is_none());
    }

    #[tokio::test]
    async fn negative_feedback_builds_a_brief() {
        let db = init_test_db().await.expect("db");
        let provider = Arc::new(ScriptedProvider::always(&brief_xml()));
        let gw = gateway(provider);

        let outlines = [outline(4), outline(5), outline(6)];
        let refs: Vec<&ChapterOutline> = outlines.iter().collect();
        let brief = build_editor_brief(
            &db,
            &gw,
            "u1",
            &[feedback("slow", "serious", "love")],
            &refs,
            "Mara",
            4,
        )
        .await
        .expect("build")
        .expect("brief");

        assert_eq!(brief.batch_start, 4);
        assert_eq!(brief.revised_outlines.len(), 3);
        assert!(brief.outline_for(5).is_some());
        assert!(brief.style_example.contains("Mara"));
    }

    #[tokio::test]
    async fn parse_failure_yields_none_not_error() {
        let db = init_test_db().await.expect("db");
        let provider = Arc::new(ScriptedProvider::always("Sorry, I can't do XML today."));
        let gw = gateway(provider);

        let outlines = [outline(4), outline(5), outline(6)];
        let refs: Vec<&ChapterOutline> = outlines.iter().collect();
        let brief = build_editor_brief(
            &db,
            &gw,
            "u1",
            &[feedback("slow", "right", "love")],
            &refs,
            "Mara",
            4,
        )
        .await
        .expect("build");
        assert!(brief.is_none());
    }

    #[test]
    fn parse_rejects_missing_batch_chapter() {
        let xml = brief_xml();
        let err = parse_brief_xml(&xml, 4, &[4, 5, 6, 7]).unwrap_err();
        assert!(err.contains("chapter 7"));
    }

    #[test]
    fn parse_rejects_missing_style_example() {
        let xml = "<editor_brief><revised_outline chapter=\"4\">\
                   <events_summary>x</events_summary></revised_outline></editor_brief>";
        let err = parse_brief_xml(xml, 4, &[4]).unwrap_err();
        assert!(err.contains("style_example"));
    }

    #[test]
    fn parse_tolerates_fenced_output() {
        let fenced = format!("```xml\n{}\n```", brief_xml());
        let brief = parse_brief_xml(&fenced, 4, &[4, 5, 6]).expect("parse");
        assert_eq!(brief.revised_outlines.len(), 3);
    }

    #[test]
    fn parse_handles_quotes_in_notes() {
        let brief = parse_brief_xml(&brief_xml(), 4, &[4, 5, 6]).expect("parse");
        let notes = &brief.outline_for(6).expect("ch6").editor_notes;
        assert!(notes.contains("\"she said\""));
    }
}
