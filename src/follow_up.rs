//! A single mentor answering a further question after a dialogue.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    context::DialogueContext,
    error::Result,
    orchestrator::MIN_TURN_CHARS,
    persona::Mentor,
    prompts,
    retriever::RetrievalHit,
};

/// History entries carried into the prompt, newest last.
pub const HISTORY_WINDOW: usize = 6;

/// Verses shown to the mentor when answering.
pub const FOLLOW_UP_HITS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRequest {
    /// The follow-up question.
    pub question: String,
    /// Who answers: krishna, buddha or jesus.
    pub mentor: Mentor,
    /// History entries from the earlier dialogue, oldest first.
    #[serde(default)]
    pub history: Vec<String>,
    /// Optional details about the asker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_background: Option<String>,
    /// The question that started the dialogue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpResult {
    pub mentor: Mentor,
    pub question: String,
    pub generated_text: String,
    pub hits: Vec<RetrievalHit>,
}

impl FollowUpResult {
    /// The two entries a caller appends to its dialogue history.
    pub fn history_entries(&self) -> [String; 2] {
        [
            format!("User Follow-up to {}: {}", self.mentor, self.question),
            format!("{}: {}", self.mentor, self.generated_text),
        ]
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// The `(system, user)` prompt pair for a follow-up, with history and
/// background cut down to bounded size.
pub fn build_follow_up_prompt(
    request: &FollowUpRequest,
    hits: &[RetrievalHit],
) -> (String, String) {
    let history = prompts::truncated_history(&request.history, HISTORY_WINDOW);
    let verses = prompts::verse_context(
        hits,
        request.mentor,
        prompts::FOLLOW_UP_VERSE_CHARS,
        Some(prompts::FOLLOW_UP_GLOSS_CHARS),
    );

    let user = prompts::follow_up_user_message(
        &request.question,
        non_blank(&request.original_question),
        non_blank(&request.user_background),
        &history,
        &verses,
    );
    (prompts::follow_up_system_prompt(request.mentor), user)
}

pub fn follow_up(
    ctx: &DialogueContext,
    request: &FollowUpRequest,
) -> Result<FollowUpResult> {
    let hits =
        ctx.retriever()
            .retrieve(&request.question, request.mentor, FOLLOW_UP_HITS)?;
    let (system, user) = build_follow_up_prompt(request, &hits);

    let text = ctx
        .generator()
        .generate(&system, &user, prompts::FOLLOW_UP_MAX_TOKENS)?;
    let too_short = text.trim().chars().count() < MIN_TURN_CHARS;
    let generated_text = if too_short {
        prompts::FOLLOW_UP_FALLBACK.to_string()
    } else {
        text
    };

    Ok(FollowUpResult {
        mentor: request.mentor,
        question: request.question.clone(),
        generated_text,
        hits,
    })
}
