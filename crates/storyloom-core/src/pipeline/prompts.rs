//! Deterministic prompt assembly shared across pipeline passes.
//!
//! Everything here is pure string composition: same inputs, same prompt.
//! Per-pass instruction text lives with its pass; the blocks here are the
//! shared context sections (bible card, prior-chapter recap, corrections).

use crate::story::feedback::{CheckpointFeedback, FeedbackPayload};
use crate::story::{Bible, Chapter, ChapterOutline, Character, RevisedOutline};

/// Writing craft rules injected into every chapter generation prompt.
pub const CRAFT_RULES: &str = "\
WRITING CRAFT RULES:
- Show emotion through action, body, and dialogue; never name the emotion outright.
- Every scene needs a goal, an obstacle, and a turn.
- Dialogue carries subtext; characters rarely say exactly what they mean.
- Ground each scene in at most two sensory details from the location card.
- Vary sentence length; read aloud rhythm matters.
- End the chapter on the outline's hook, rendered as a concrete image or line.
- No recaps of earlier chapters; trust the reader.
- Avoid em-dashes, 'not X but Y' constructions, 'something in X' constructions, \
and 'the kind of X that Y' constructions.";

fn character_card(label: &str, character: &Character) -> String {
    format!(
        "{label}: {name}\n  Goals: {goals}\n  Fears: {fears}\n  Voice: {voice}\n  Contradictions: {contradictions}",
        name = character.name,
        goals = character.goals,
        fears = character.fears,
        voice = character.voice,
        contradictions = character.contradictions,
    )
}

/// The bible rendered as a compact prompt block.
pub fn bible_card(bible: &Bible) -> String {
    let mut card = String::new();
    card.push_str("STORY BIBLE\n");
    card.push_str(&character_card("PROTAGONIST", &bible.protagonist));
    card.push('\n');
    card.push_str(&character_card("ANTAGONIST", &bible.antagonist));
    card.push('\n');
    for supporting in &bible.supporting {
        card.push_str(&character_card("SUPPORTING", supporting));
        card.push('\n');
    }
    if !bible.world_rules.is_empty() {
        card.push_str("WORLD RULES:\n");
        for rule in &bible.world_rules {
            card.push_str(&format!("- {rule}\n"));
        }
    }
    card.push_str(&format!("CENTRAL CONFLICT: {}\n", bible.central_conflict));
    card.push_str(&format!("STAKES: {}\n", bible.stakes));
    if !bible.themes.is_empty() {
        card.push_str(&format!("THEMES: {}\n", bible.themes.join(", ")));
    }
    if !bible.key_locations.is_empty() {
        card.push_str("KEY LOCATIONS:\n");
        for location in &bible.key_locations {
            card.push_str(&format!("- {}: {}\n", location.name, location.sensory_details));
        }
    }
    if !bible.timeline.is_empty() {
        card.push_str(&format!("TIMELINE: {}\n", bible.timeline));
    }
    card
}

/// The chapter outline block, honoring an editor-brief override when present.
pub fn outline_block(outline: &ChapterOutline, revision: Option<&RevisedOutline>) -> String {
    let events_summary = revision.map_or(outline.events_summary.as_str(), |r| {
        r.events_summary.as_str()
    });
    let mut block = format!(
        "CHAPTER {n} OUTLINE\nTitle: {title}\nEvents: {events}\nCharacter focus: {focus}\n\
         Tension level: {tension}/10\nEmotional arc: {arc}\nChapter hook: {hook}\n",
        n = outline.chapter_number,
        title = outline.title,
        events = events_summary,
        focus = outline.character_focus,
        tension = outline.tension_level,
        arc = outline.emotional_arc,
        hook = outline.chapter_hook,
    );
    if !outline.key_revelations.is_empty() {
        block.push_str(&format!(
            "Key revelations: {}\n",
            outline.key_revelations.join("; ")
        ));
    }
    if let Some(revision) = revision {
        block.push_str(&format!("EDITOR NOTES: {}\n", revision.editor_notes));
    }
    block
}

/// Recap of previously committed chapters.
///
/// Every chapter contributes its key events; the most recent `hook_window`
/// chapters also contribute their opening and closing hooks, so chapter N
/// always sees chapter N-1's closing hook.
pub fn previous_chapters_block(chapters: &[Chapter], hook_window: u32) -> String {
    if chapters.is_empty() {
        return String::new();
    }
    let hook_from = chapters
        .len()
        .saturating_sub(hook_window as usize);

    let mut block = String::from("PREVIOUS CHAPTERS\n");
    for (idx, chapter) in chapters.iter().enumerate() {
        block.push_str(&format!("Chapter {}: {}\n", chapter.chapter_number, chapter.title));
        for event in &chapter.key_events {
            block.push_str(&format!("  - {event}\n"));
        }
        if idx >= hook_from {
            block.push_str(&format!("  Opens: {}\n", chapter.opening_hook));
            block.push_str(&format!("  Closes: {}\n", chapter.closing_hook));
        }
    }
    block
}

/// Accumulated course corrections as an XML block.
///
/// Every committed feedback entry that calls for corrections contributes
/// one `<correction>` element; positive or skipped checkpoints contribute
/// nothing.
pub fn corrections_xml(history: &[CheckpointFeedback]) -> String {
    let corrections: Vec<String> = history
        .iter()
        .filter(|f| f.payload.needs_corrections())
        .map(|f| {
            let detail = match &f.payload {
                FeedbackPayload::Dimensions(dims) => {
                    let mut parts = Vec::new();
                    if let Some(pacing) = &dims.pacing {
                        parts.push(format!("pacing felt '{pacing}'"));
                    }
                    if let Some(tone) = &dims.tone {
                        parts.push(format!("tone felt '{tone}'"));
                    }
                    if let Some(character) = &dims.character {
                        parts.push(format!("character reaction was '{character}'"));
                    }
                    parts.join(", ")
                }
                FeedbackPayload::FreeForm { response } => response.clone(),
                FeedbackPayload::VoiceInterview { extraction } => extraction.to_string(),
                FeedbackPayload::Skipped => String::new(),
            };
            format!(
                "  <correction checkpoint=\"{}\">{}</correction>",
                f.checkpoint.as_tag(),
                detail
            )
        })
        .collect();

    if corrections.is_empty() {
        return String::new();
    }
    format!(
        "<course_corrections>\n{}\n</course_corrections>",
        corrections.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::feedback::{Checkpoint, DimensionFeedback};
    use chrono::Utc;

    fn character(name: &str) -> Character {
        Character {
            name: name.to_string(),
            goals: "g".to_string(),
            fears: "f".to_string(),
            voice: "v".to_string(),
            contradictions: "c".to_string(),
        }
    }

    fn bible() -> Bible {
        Bible {
            protagonist: character("Mara"),
            antagonist: character("Hollis"),
            supporting: vec![],
            world_rules: vec!["the tide obeys no clock".to_string()],
            central_conflict: "conflict".to_string(),
            stakes: "stakes".to_string(),
            themes: vec!["belonging".to_string()],
            key_locations: vec![],
            timeline: String::new(),
        }
    }

    fn outline() -> ChapterOutline {
        ChapterOutline {
            chapter_number: 4,
            title: "The Reef".to_string(),
            events_summary: "original events".to_string(),
            character_focus: "Mara".to_string(),
            tension_level: 6,
            word_count_target: 2500,
            key_revelations: vec!["the reef is man-made".to_string()],
            emotional_arc: "doubt to anger".to_string(),
            chapter_hook: "a lantern answers from the sea".to_string(),
        }
    }

    fn chapter(n: u32) -> Chapter {
        Chapter {
            id: format!("ch{n}"),
            story_id: "s1".to_string(),
            chapter_number: n,
            title: format!("Chapter {n}"),
            content: String::new(),
            word_count: 0,
            quality_score: None,
            regeneration_count: 0,
            quality_review: None,
            constraint_report: None,
            opening_hook: format!("open {n}"),
            closing_hook: format!("close {n}"),
            key_events: vec![format!("event {n}")],
            flagged: false,
            created_at: Utc::now(),
            revised_at: None,
        }
    }

    #[test]
    fn bible_card_names_everyone() {
        let card = bible_card(&bible());
        assert!(card.contains("PROTAGONIST: Mara"));
        assert!(card.contains("ANTAGONIST: Hollis"));
        assert!(card.contains("the tide obeys no clock"));
    }

    #[test]
    fn outline_block_uses_revision_when_present() {
        let revision = RevisedOutline {
            chapter_number: 4,
            events_summary: "revised events".to_string(),
            editor_notes: "slow the middle scene".to_string(),
        };
        let block = outline_block(&outline(), Some(&revision));
        assert!(block.contains("revised events"));
        assert!(!block.contains("original events"));
        assert!(block.contains("EDITOR NOTES: slow the middle scene"));

        let plain = outline_block(&outline(), None);
        assert!(plain.contains("original events"));
        assert!(!plain.contains("EDITOR NOTES"));
    }

    #[test]
    fn previous_block_has_all_events_but_windowed_hooks() {
        let chapters: Vec<Chapter> = (1..=5).map(chapter).collect();
        let block = previous_chapters_block(&chapters, 3);
        // Every chapter's key events are present.
        for n in 1..=5 {
            assert!(block.contains(&format!("event {n}")));
        }
        // Hooks only for the last three.
        assert!(!block.contains("close 1"));
        assert!(!block.contains("close 2"));
        assert!(block.contains("close 3"));
        assert!(block.contains("close 5"));
    }

    #[test]
    fn most_recent_closing_hook_always_present() {
        let chapters: Vec<Chapter> = (1..=2).map(chapter).collect();
        let block = previous_chapters_block(&chapters, 1);
        assert!(block.contains("close 2"));
    }

    #[test]
    fn corrections_xml_empty_for_positive_history() {
        let feedback = CheckpointFeedback {
            user_id: "u1".to_string(),
            story_id: "s1".to_string(),
            checkpoint: Checkpoint::Chapter2,
            payload: FeedbackPayload::Dimensions(DimensionFeedback {
                pacing: Some("hooked".to_string()),
                tone: Some("right".to_string()),
                character: Some("love".to_string()),
            }),
            created_at: Utc::now(),
        };
        assert!(corrections_xml(&[feedback]).is_empty());
    }

    #[test]
    fn corrections_xml_carries_negative_dimensions() {
        let feedback = CheckpointFeedback {
            user_id: "u1".to_string(),
            story_id: "s1".to_string(),
            checkpoint: Checkpoint::Chapter2,
            payload: FeedbackPayload::Dimensions(DimensionFeedback {
                pacing: Some("slow".to_string()),
                tone: Some("right".to_string()),
                character: Some("love".to_string()),
            }),
            created_at: Utc::now(),
        };
        let xml = corrections_xml(&[feedback]);
        assert!(xml.contains("<course_corrections>"));
        assert!(xml.contains("checkpoint=\"chapter_2\""));
        assert!(xml.contains("pacing felt 'slow'"));
    }
}
