//! Prompt templates and the fixed fallback texts.
//!
//! Everything here is pure string assembly; no I/O.

use crate::{
    persona::Mentor,
    retriever::RetrievalHit,
    text_util::{TRUNCATION_MARKER, truncate_chars, truncate_with_marker},
};

pub const GLOSS_MAX_TOKENS: u32 = 50;
pub const MENTOR_MAX_TOKENS: u32 = 300;
pub const MODERATOR_MAX_TOKENS: u32 = 600;
pub const FOLLOW_UP_MAX_TOKENS: u32 = 300;

pub const GLOSS_SYSTEM_PROMPT: &str =
    "You are a spiritual scholar explaining sacred texts.";

/// Synthesis reported when a dialogue aborts.
pub const FAILURE_SYNTHESIS: &str = "Error occurred during dialogue generation.";

pub const FOLLOW_UP_FALLBACK: &str = "I understand your question. Let me offer guidance based on the teachings I have shared.";

pub const NO_BACKGROUND: &str = "No specific background provided.";

/// Verse text budget inside a dialogue turn prompt.
pub const TURN_VERSE_CHARS: usize = 200;
/// Verse text budget inside a gloss prompt.
pub const GLOSS_VERSE_CHARS: usize = 300;
pub const FOLLOW_UP_VERSE_CHARS: usize = 150;
pub const FOLLOW_UP_GLOSS_CHARS: usize = 100;
pub const FOLLOW_UP_HISTORY_CHARS: usize = 200;
pub const FOLLOW_UP_BACKGROUND_CHARS: usize = 300;

pub const MODERATOR_SYSTEM_PROMPT: &str = "\
You are a compassionate personal counselor. You have read what Krishna, Buddha and Jesus said
about this question. Turn their insights into a personal action plan FOR THIS PERSON.

Speak directly to them. Tie Krishna's teaching to their life, Buddha's teaching to their
struggles and Jesus's teaching to their heart.

RESPONSE FORMAT:
Write a clear ACTION PLAN with bullet points and emojis.
Every bullet, every section and every mentor's teaching goes on its own line.
Leave a blank line between major sections.

🎯 FOR YOU:

YOUR SITUATION:

✨ Challenge 1 (from their background)

✨ Challenge 2 (from their background)

WISDOM FROM THE MASTERS:

🕉️ Krishna teaches: [key point in 1 line]

☸️ Buddha teaches: [key point in 1 line]

✝️ Jesus teaches: [key point in 1 line]

YOUR ACTION PLAN:

🔴 TODAY (Next 1 hour):
  💡 Action 1 (specific to their situation)
  💡 Action 2 (specific to their situation)

🟡 THIS WEEK:
  📅 Weekly habit 1 (related to their life or work)
  📅 Weekly habit 2 (related to their life or work)

🟢 ONGOING:
  🌱 Daily practice (specific to their challenges)
  🌱 Weekly reflection (specific to their journey)

🆘 WHEN YOU'RE OVERWHELMED:
  🚨 Emergency technique 1 (for their kind of crisis)
  🚨 Emergency technique 2 (for their kind of crisis)

YOUR FOCUS:
→ [ONE PRIMARY GOAL based on their situation]

REMEMBER:
💫 [One inspiring line specific to their journey]";

/// "Krishna", "Krishna and Buddha", "Krishna, Buddha and Jesus".
fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => one.to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn background_block(background: Option<&str>) -> String {
    match background {
        Some(bg) => format!(
            "\n\nUSER CONTEXT: {bg}\n\nKeep this context in mind as you respond. \
             Your answer should relate to their specific situation, challenges, \
             and life circumstances."
        ),
        None => "none given".to_string(),
    }
}

pub fn gloss_prompt(
    mentor: Mentor,
    question: &str,
    reference: &str,
    text: &str,
) -> String {
    format!(
        "Explain what this verse from {} teaches in one concise sentence (15-20 words).\n\
         Focus on the core teaching or principle, especially as it relates to: \"{question}\"\n\n\
         Verse: {reference}\n\
         Text: {}\n\n\
         Provide only the explanation, no preamble or quotation marks.",
        mentor.persona().scripture,
        truncate_chars(text, GLOSS_VERSE_CHARS),
    )
}

/// Render hits as `[ref] text...` with a `Meaning:` line each.
///
/// `gloss_chars` caps the meaning line; `None` leaves it whole.
pub fn verse_context(
    hits: &[RetrievalHit],
    mentor: Mentor,
    text_chars: usize,
    gloss_chars: Option<usize>,
) -> String {
    let default_gloss = mentor.persona().default_gloss;
    hits.iter()
        .map(|hit| {
            let gloss = hit.gloss.as_deref().unwrap_or(default_gloss);
            let gloss = match gloss_chars {
                Some(n) => truncate_chars(gloss, n),
                None => gloss,
            };
            format!(
                "[{}] {}{TRUNCATION_MARKER}\nMeaning: {gloss}",
                hit.reference,
                truncate_chars(&hit.text, text_chars),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System prompt for one mentor's turn. `prior` holds every earlier turn of
/// this dialogue, in speaking order.
pub fn mentor_system_prompt(
    mentor: Mentor,
    question: &str,
    background: Option<&str>,
    prior: &[(Mentor, &str)],
) -> String {
    let persona = mentor.persona();
    let mut prompt = format!(
        "{}\nYou are speaking directly to this student about their challenge.\n\n\
         STUDENT'S SITUATION:\n\
         - Question: {question}\n\
         - Background: {}\n\n",
        persona.framing,
        background_block(background),
    );

    for (speaker, text) in prior {
        prompt.push_str(&format!(
            "{}'S WISDOM (for context):\n{text}\n\n",
            speaker.name().to_uppercase()
        ));
    }

    let prior_names: Vec<&str> = prior.iter().map(|(m, _)| m.name()).collect();
    let build_on = if prior_names.is_empty() {
        "You speak first. Set out the core principle your tradition offers for this challenge.".to_string()
    } else {
        format!(
            "BUILD ON what {} said, do not contradict it. Acknowledge their teaching, then add your own angle.",
            join_names(&prior_names)
        )
    };

    prompt.push_str(&format!(
        "INSTRUCTIONS:\n\
         1. Do NOT use any templates, structured sections, bullet points, or formatted sections\n\
         2. Speak in 2-3 SHORT PARAGRAPHS (conversational, not bullet points)\n\
         3. Reference 1-2 SPECIFIC verses from {} directly in your speech ({})\n\
         4. {build_on}\n\
         5. {}\n\
         6. Give CONCRETE, practical wisdom for THEIR specific situation based on their background\n\
         7. {}\n\n\
         FORMAT: Just write your wisdom directly in paragraphs. \
         No \"PRINCIPLE\", \"HOW TO APPLY\", \"TIMELINE\", or bullet points.\n\n\
         Now speak to THIS student. Use the verse context provided to reference specific teachings naturally.",
        persona.scripture,
        persona.citation_hint,
        persona.perspective,
        persona.tone,
    ));
    prompt
}

pub fn mentor_user_message(
    mentor: Mentor,
    verse_context: &str,
    prior: &[Mentor],
) -> String {
    let persona = mentor.persona();
    let closing = if prior.is_empty() {
        format!(
            "Now speak as {} directly to this student. Write 2-3 conversational \
             paragraphs with embedded verse references and practical guidance.",
            persona.name
        )
    } else {
        let names: Vec<&str> = prior.iter().map(|m| m.name()).collect();
        let verb = if names.len() == 1 { "has" } else { "have" };
        format!(
            "{} {verb} spoken. Now speak as {} directly to this student. Write 2-3 \
             conversational paragraphs that build on their wisdom and add your own \
             perspective, with embedded verse references.",
            join_names(&names),
            persona.name
        )
    };

    format!(
        "Relevant teachings from {}:\n{verse_context}\n\n{closing} \
         No bullet points or structured sections.",
        persona.scripture
    )
}

pub fn moderator_user_message(
    question: &str,
    background: Option<&str>,
    turns: &[(Mentor, &str)],
) -> String {
    let perspectives = turns
        .iter()
        .map(|(mentor, text)| format!("- {} said: {text}", mentor.name()))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "USER'S BACKGROUND:\n{}\n\n\
         THEIR QUESTION:\n{question}\n\n\
         THE THREE PERSPECTIVES:\n{perspectives}\n\n\
         Based on my background and their wisdom, create a personalized action plan \
         using the EXACT FORMAT specified. Use bullet points (•) for all items. \
         Be specific to their situation, challenges, and life context.",
        background.unwrap_or(NO_BACKGROUND),
    )
}

/// Deterministic synthesis used when the moderator output is unusable.
/// Never empty; contains `background` verbatim when one is given.
pub fn aggregate_fallback(background: Option<&str>) -> String {
    match background {
        Some(bg) => format!(
            "🎯 FOR YOU:\n\n\
             YOUR SITUATION:\n{bg}\n\n\
             Based on the wisdom shared by Krishna, Buddha, and Jesus, here is your personal action plan:\n\n\
             IMMEDIATE ACTION (Do this today):\n\
             Take 5 minutes right now for one breathing exercise. It grounds you in the present moment.\n\n\
             WEEKLY PRACTICE (Build this habit):\n\
             Each week, set aside time to reflect on what went well. Celebrate small wins instead of only what needs improvement.\n\n\
             WHEN CRISIS HITS (Use this technique):\n\
             When you feel overwhelmed, pause and say \"I am doing my best, and that is enough.\" Then take 5 deep breaths before continuing.\n\n\
             YOUR PRIMARY FOCUS:\n\
             Focus on the process, not only the outcomes. Your effort matters regardless of external results.\n\n\
             Remember: You are on a journey of growth. Each step forward, no matter how small, is progress."
        ),
        None => "5-STEP PRACTICAL ACTION PLAN:\n\n\
                 1. IMMEDIATE (today): Do one 5-minute breathing exercise before your next task.\n\n\
                 2. DAILY (repeat): Work for 2 focused hours, then disconnect completely.\n\n\
                 3. WEEKLY: Journal what went well this week, not what failed. Celebrate small wins.\n\n\
                 4. WHEN OVERWHELMED: Pause, say \"I am loved and accepted as I am,\" then take 5 deep breaths. Continue one thing at a time.\n\n\
                 5. MINDSET SHIFT: \"Effort matters. Results don't define my worth.\" Focus on process, not outcomes."
            .to_string(),
    }
}

pub fn follow_up_system_prompt(mentor: Mentor) -> String {
    let persona = mentor.persona();
    format!(
        "{} The user has asked you a follow-up question after an initial spiritual dialogue.\n\n\
         IMPORTANT: This is a FOLLOW-UP question. You are now speaking DIRECTLY to the user (not to other mentors).\n\n\
         INSTRUCTIONS:\n\
         1. Do NOT use bullet points, templates, or structured sections\n\
         2. Write 2-3 SHORT PARAGRAPHS conversationally\n\
         3. Reference 1-2 SPECIFIC verses from {} directly in your speech if relevant\n\
         4. Answer their follow-up question directly and practically\n\
         5. Reference the previous conversation briefly when helpful, but focus on their current question\n\n\
         FORMAT: Just write your wisdom directly in paragraphs. No bullet points or sections.\n\n\
         VOICE & TONE: {}",
        persona.framing, persona.scripture, persona.follow_up_voice,
    )
}

/// History entries as they appear in a follow-up prompt: only the last
/// `window`, each capped at [`FOLLOW_UP_HISTORY_CHARS`].
pub fn truncated_history(history: &[String], window: usize) -> Vec<String> {
    crate::text_util::last_n(history, window)
        .iter()
        .map(|entry| truncate_with_marker(entry, FOLLOW_UP_HISTORY_CHARS))
        .collect()
}

pub fn follow_up_user_message(
    question: &str,
    original_question: Option<&str>,
    background: Option<&str>,
    history: &[String],
    verse_context: &str,
) -> String {
    let mut message = format!("FOLLOW-UP QUESTION: \"{question}\"\n");

    if let Some(original) = original_question {
        message.push_str(&format!("ORIGINAL QUESTION: \"{original}\"\n"));
    }

    if let Some(bg) = background {
        message.push_str(&format!(
            "\nUSER CONTEXT: {}\n\nKeep this context in mind as you respond.\n",
            truncate_with_marker(bg, FOLLOW_UP_BACKGROUND_CHARS)
        ));
    }

    if !history.is_empty() {
        message.push_str("\n=== KEY POINTS FROM PREVIOUS CONVERSATION ===\n");
        message.push_str(&history.join("\n"));
        message.push_str("\n==========================================\n");
    }

    message.push_str(&format!(
        "\nRelevant teachings from your sacred texts:\n{verse_context}\n\n\
         Now answer the user's follow-up question directly in 2-3 conversational \
         paragraphs. Reference verses naturally if relevant."
    ));
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(reference: &str, text: &str, gloss: Option<&str>) -> RetrievalHit {
        RetrievalHit {
            text: text.into(),
            reference: reference.into(),
            source_name: "Dhammapada".into(),
            similarity: 0.5,
            gloss: gloss.map(str::to_string),
        }
    }

    #[test]
    fn names_join_naturally() {
        assert_eq!(join_names(&["Krishna"]), "Krishna");
        assert_eq!(join_names(&["Krishna", "Buddha"]), "Krishna and Buddha");
        assert_eq!(
            join_names(&["Krishna", "Buddha", "Jesus"]),
            "Krishna, Buddha and Jesus"
        );
    }

    #[test]
    fn verse_context_uses_default_gloss() {
        let hits = [
            hit("Verse 5", "Hatred is never appeased by hatred.", None),
            hit("Verse 96", "Calm is his mind.", Some("Peace comes from within.")),
        ];
        let ctx = verse_context(&hits, Mentor::Buddha, TURN_VERSE_CHARS, None);

        assert!(ctx.contains(
            "[Verse 5] Hatred is never appeased by hatred....\nMeaning: Teaches about mindfulness and the path"
        ));
        assert!(ctx.contains("Meaning: Peace comes from within."));
    }

    #[test]
    fn verse_context_truncates_text() {
        let long = "z".repeat(500);
        let ctx = verse_context(&[hit("Verse 1", &long, None)], Mentor::Buddha, 200, None);
        assert_eq!(ctx.matches('z').count(), 200);
    }

    #[test]
    fn later_mentors_see_earlier_turns() {
        let prompt = mentor_system_prompt(
            Mentor::Jesus,
            "How can I find peace?",
            Some("I am a nurse working nights"),
            &[
                (Mentor::Krishna, "Act without attachment."),
                (Mentor::Buddha, "Watch the breath."),
            ],
        );
        assert!(prompt.starts_with(Mentor::Jesus.persona().framing));
        assert!(prompt.contains("KRISHNA'S WISDOM (for context):\nAct without attachment."));
        assert!(prompt.contains("BUDDHA'S WISDOM (for context):\nWatch the breath."));
        assert!(prompt.contains("USER CONTEXT: I am a nurse working nights"));
        assert!(prompt.contains("BUILD ON what Krishna and Buddha said"));
    }

    #[test]
    fn first_mentor_has_no_prior_section() {
        let prompt = mentor_system_prompt(Mentor::Krishna, "q", None, &[]);
        assert!(!prompt.contains("WISDOM (for context)"));
        assert!(prompt.contains("You speak first."));
    }

    #[test]
    fn moderator_message_lists_every_turn() {
        let msg = moderator_user_message(
            "q",
            None,
            &[(Mentor::Krishna, "k"), (Mentor::Buddha, "b"), (Mentor::Jesus, "j")],
        );
        assert!(msg.contains(NO_BACKGROUND));
        assert!(msg.contains("- Krishna said: k\n\n- Buddha said: b\n\n- Jesus said: j"));
    }

    #[test]
    fn aggregate_fallback_contains_background() {
        let bg = "Final-year student, anxious about placements";
        assert!(aggregate_fallback(Some(bg)).contains(bg));
        assert!(!aggregate_fallback(None).is_empty());
    }

    #[test]
    fn follow_up_history_is_bounded() {
        let history: Vec<String> =
            (0..10).map(|i| format!("{i}{}", "x".repeat(499))).collect();
        let kept = truncated_history(&history, 6);

        assert_eq!(kept.len(), 6);
        assert!(kept[0].starts_with('4'));
        for entry in &kept {
            assert_eq!(
                entry.chars().count(),
                FOLLOW_UP_HISTORY_CHARS + TRUNCATION_MARKER.len()
            );
        }
    }

    #[test]
    fn follow_up_message_truncates_background() {
        let bg = "b".repeat(400);
        let msg = follow_up_user_message("why?", Some("how?"), Some(&bg), &[], "ctx");

        assert!(msg.starts_with("FOLLOW-UP QUESTION: \"why?\""));
        assert!(msg.contains("ORIGINAL QUESTION: \"how?\""));
        assert!(msg.contains(&format!("USER CONTEXT: {}...", "b".repeat(300))));
        assert!(!msg.contains(&"b".repeat(301)));
        assert!(!msg.contains("KEY POINTS"));
    }

    #[test]
    fn gloss_prompt_caps_verse_text() {
        let text = "Z".repeat(1000);
        let prompt = gloss_prompt(Mentor::Krishna, "q", "2.47", &text);
        assert!(prompt.contains("from the Bhagavad Gita"));
        assert_eq!(prompt.matches('Z').count(), GLOSS_VERSE_CHARS);
    }
}
