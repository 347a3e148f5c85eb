use std::{fmt::Write as _, path::Path};

use chrono::{DateTime, Local};

use crate::{
    error::Result,
    orchestrator::DialogueResponse,
    text_util::{TRUNCATION_MARKER, truncate_chars},
};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Verses listed per mentor in a transcript.
const VERSES_PER_MENTOR: usize = 3;
const VERSE_PREVIEW_CHARS: usize = 200;

const RULE: &str = "══════════════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "──────────────────────────────────────────────────────────────────────";

/// Plain-text transcript of a finished dialogue.
pub fn render(response: &DialogueResponse, at: DateTime<Local>) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "🎭 DIVINE DIALOGUE");
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Date: {}", at.format(TIMESTAMP_FORMAT));
    let _ = writeln!(out);
    let _ = writeln!(out, "YOUR QUESTION:\n{}", response.question);
    if let Some(bg) = &response.user_background {
        let _ = writeln!(out, "\nYOUR BACKGROUND:\n{bg}");
    }
    let _ = writeln!(out);

    for turn in &response.mentor_responses {
        let persona = turn.mentor.persona();
        let _ = writeln!(out, "{THIN_RULE}");
        let _ = writeln!(
            out,
            "{} {}:\n{}\n",
            persona.icon,
            persona.name.to_uppercase(),
            turn.generated_text
        );

        if !turn.hits.is_empty() {
            let _ = writeln!(out, "Referenced Verses:");
            for hit in turn.hits.iter().take(VERSES_PER_MENTOR) {
                let _ = writeln!(
                    out,
                    "  • {} (Similarity: {:.1}%)\n    {}{TRUNCATION_MARKER}",
                    hit.reference,
                    hit.similarity * 100.0,
                    truncate_chars(&hit.text, VERSE_PREVIEW_CHARS)
                );
            }
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "🌟 SYNTHESIZED WISDOM ACROSS TRADITIONS:");
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "{}\n", response.synthesis);
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Generated by divine-dialogue");
    let _ = writeln!(out, "{RULE}");
    out
}

/// Render with the current local time and write to `path`.
pub fn export(response: &DialogueResponse, path: &Path) -> Result<()> {
    std::fs::write(path, render(response, Local::now()))?;
    Ok(())
}
