//! The dialogue itself: three mentor turns in fixed order, then a
//! synthesis, threaded through one [`ConversationState`].

use std::time::Instant;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    context::DialogueContext,
    error::Result,
    persona::Mentor,
    prompts,
    retriever::{DEFAULT_K, RetrievalHit},
};

/// Turn text shorter than this (after trimming) is replaced by the
/// mentor's fallback.
pub const MIN_TURN_CHARS: usize = 10;

/// Synthesis shorter than this, or mentioning "error", is replaced by the
/// template plan.
pub const MIN_SYNTHESIS_CHARS: usize = 20;

pub const MODERATOR_LABEL: &str = "Moderator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Turn(Mentor),
    Aggregate,
    Done,
}

impl Stage {
    pub const START: Stage = Stage::Turn(Mentor::Krishna);

    pub fn next(self) -> Stage {
        match self {
            Stage::Turn(Mentor::Krishna) => Stage::Turn(Mentor::Buddha),
            Stage::Turn(Mentor::Buddha) => Stage::Turn(Mentor::Jesus),
            Stage::Turn(Mentor::Jesus) => Stage::Aggregate,
            Stage::Aggregate | Stage::Done => Stage::Done,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub mentor: Mentor,
    pub generated_text: String,
    pub hits: Vec<RetrievalHit>,
}

impl TurnResult {
    pub fn history_entry(&self) -> String {
        format!("{}: {}", self.mentor, self.generated_text)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DialogueRequest {
    /// The question all three mentors answer.
    pub question: String,
    /// Optional details about the asker, used to personalize the synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_background: Option<String>,
}

impl DialogueRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_background: None,
        }
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.user_background = Some(background.into());
        self
    }

    /// The background as supplied, if it has any non-whitespace content.
    pub fn background(&self) -> Option<&str> {
        self.user_background
            .as_deref()
            .filter(|bg| !bg.trim().is_empty())
    }
}

/// Per-request state. Turns are only ever appended.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub query: String,
    pub user_context: Option<String>,
    turns: Vec<TurnResult>,
    pub aggregate_result: Option<String>,
}

impl ConversationState {
    pub fn new(request: &DialogueRequest) -> Self {
        Self {
            query: request.question.clone(),
            user_context: request.background().map(str::to_string),
            turns: Vec::with_capacity(Mentor::ALL.len()),
            aggregate_result: None,
        }
    }

    pub fn turns(&self) -> &[TurnResult] {
        &self.turns
    }

    pub fn push_turn(&mut self, turn: TurnResult) {
        self.turns.push(turn);
    }

    fn spoken(&self) -> Vec<(Mentor, &str)> {
        self.turns
            .iter()
            .map(|t| (t.mentor, t.generated_text.as_str()))
            .collect()
    }

    fn into_response(self) -> DialogueResponse {
        let synthesis = self
            .aggregate_result
            .unwrap_or_else(|| prompts::aggregate_fallback(self.user_context.as_deref()));
        let mut history: Vec<String> =
            self.turns.iter().map(TurnResult::history_entry).collect();
        history.push(format!("{MODERATOR_LABEL}: {synthesis}"));

        DialogueResponse {
            question: self.query,
            user_background: self.user_context,
            mentor_responses: self.turns,
            synthesis,
            history,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DialogueResponse {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_background: Option<String>,
    pub mentor_responses: Vec<TurnResult>,
    pub synthesis: String,
    pub history: Vec<String>,
}

impl DialogueResponse {
    pub fn turn(&self, mentor: Mentor) -> Option<&TurnResult> {
        self.mentor_responses.iter().find(|t| t.mentor == mentor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DialogueFailure {
    pub question: String,
    pub error: String,
    /// Always empty; partial dialogues are never returned.
    pub mentor_responses: Vec<TurnResult>,
    pub synthesis: String,
}

impl DialogueFailure {
    pub fn new(question: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            error: error.into(),
            mentor_responses: Vec::new(),
            synthesis: prompts::FAILURE_SYNTHESIS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DialogueOutcome {
    Completed(DialogueResponse),
    Failed(DialogueFailure),
}

impl DialogueOutcome {
    pub fn question(&self) -> &str {
        match self {
            Self::Completed(r) => &r.question,
            Self::Failed(f) => &f.question,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Run a full dialogue. Never panics and never returns a partial result:
/// any step error turns the whole request into [`DialogueOutcome::Failed`].
pub fn run_dialogue(
    ctx: &DialogueContext,
    request: &DialogueRequest,
) -> DialogueOutcome {
    match drive(ctx, request) {
        Ok(response) => DialogueOutcome::Completed(response),
        Err(e) => {
            tracing::warn!(error = %e, "dialogue aborted");
            DialogueOutcome::Failed(DialogueFailure::new(
                request.question.clone(),
                e.to_string(),
            ))
        }
    }
}

fn drive(ctx: &DialogueContext, request: &DialogueRequest) -> Result<DialogueResponse> {
    let mut state = ConversationState::new(request);
    let mut stage = Stage::START;

    while stage != Stage::Done {
        let started = Instant::now();
        match stage {
            Stage::Turn(mentor) => {
                let turn = mentor_turn(ctx, &state, mentor)?;
                state.push_turn(turn);
            }
            Stage::Aggregate => {
                state.aggregate_result = Some(aggregate(ctx, &state)?);
            }
            Stage::Done => {}
        }
        tracing::debug!(
            ?stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage finished"
        );
        stage = stage.next();
    }

    Ok(state.into_response())
}

fn mentor_turn(
    ctx: &DialogueContext,
    state: &ConversationState,
    mentor: Mentor,
) -> Result<TurnResult> {
    let hits = ctx.retriever().retrieve(&state.query, mentor, DEFAULT_K)?;

    let spoken = state.spoken();
    let prior: Vec<Mentor> = spoken.iter().map(|(m, _)| *m).collect();
    let system = prompts::mentor_system_prompt(
        mentor,
        &state.query,
        state.user_context.as_deref(),
        &spoken,
    );
    let verses =
        prompts::verse_context(&hits, mentor, prompts::TURN_VERSE_CHARS, None);
    let user = prompts::mentor_user_message(mentor, &verses, &prior);

    let text = ctx
        .generator()
        .generate(&system, &user, prompts::MENTOR_MAX_TOKENS)?;
    let generated_text = if text.trim().chars().count() < MIN_TURN_CHARS {
        tracing::warn!(mentor = %mentor, "empty turn, using fallback text");
        mentor.persona().fallback.to_string()
    } else {
        text
    };

    Ok(TurnResult {
        mentor,
        generated_text,
        hits,
    })
}

fn aggregate(ctx: &DialogueContext, state: &ConversationState) -> Result<String> {
    let user = prompts::moderator_user_message(
        &state.query,
        state.user_context.as_deref(),
        &state.spoken(),
    );
    let text = ctx.generator().generate(
        prompts::MODERATOR_SYSTEM_PROMPT,
        &user,
        prompts::MODERATOR_MAX_TOKENS,
    )?;

    if text.trim().chars().count() < MIN_SYNTHESIS_CHARS
        || text.to_lowercase().contains("error")
    {
        tracing::warn!("unusable synthesis, using template plan");
        return Ok(prompts::aggregate_fallback(state.user_context.as_deref()));
    }
    Ok(text)
}
