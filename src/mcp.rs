use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    context::DialogueContext,
    error,
    follow_up::{FollowUpRequest, FollowUpResult, follow_up},
    orchestrator::{DialogueOutcome, DialogueRequest, run_dialogue},
    persona::Mentor,
    retriever::{DEFAULT_K, RetrievalHit},
};

#[derive(Clone)]
pub struct DivineMcpServer {
    ctx: Arc<DialogueContext>,
    tool_router: ToolRouter<Self>,
}

impl DivineMcpServer {
    pub fn new(ctx: Arc<DialogueContext>) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DivineMcpServer {
    /// Full three-mentor dialogue plus synthesis.
    #[tool(
        name = "divine_dialogue",
        description = "Ask Krishna, Buddha and Jesus one question. Each answers from their scripture in turn, then a moderator turns the three answers into a personal action plan."
    )]
    pub async fn divine_dialogue(
        &self,
        params: Parameters<DialogueRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let request = params.0;
        let ctx = Arc::clone(&self.ctx);

        let outcome =
            tokio::task::spawn_blocking(move || run_dialogue(&ctx, &request))
                .await
                .map_err(|e| mcp_error("dialogue task failed", e))?;

        let summary = format_dialogue_summary(&outcome);
        let structured = serde_json::to_value(&outcome)
            .map_err(|e| mcp_error("failed to serialize dialogue", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(!outcome.is_completed());
        Ok(result)
    }

    /// One mentor answers a further question.
    #[tool(
        name = "divine_follow_up",
        description = "Ask one mentor a follow-up question. Pass the history from a previous divine_dialogue call so the answer can build on it."
    )]
    pub async fn divine_follow_up(
        &self,
        params: Parameters<FollowUpRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let request = params.0;
        let ctx = Arc::clone(&self.ctx);

        let result = tokio::task::spawn_blocking(move || follow_up(&ctx, &request))
            .await
            .map_err(|e| mcp_error("follow-up task failed", e))?
            .map_err(|e| mcp_error("follow-up failed", e))?;

        let summary = format_follow_up_summary(&result);
        let structured = serde_json::to_value(&result)
            .map_err(|e| mcp_error("failed to serialize follow-up", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        Ok(result)
    }

    /// Verse search within one mentor's scripture.
    #[tool(
        name = "divine_search",
        description = "Find the verses from one mentor's scripture closest to a query, with similarity scores and optional one-line explanations."
    )]
    pub async fn divine_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let ctx = Arc::clone(&self.ctx);
        let query = params.query.clone();
        let mentor = params.mentor;
        let limit = params.limit.unwrap_or(DEFAULT_K);
        let gloss = params.gloss.unwrap_or(false);

        let hits = tokio::task::spawn_blocking(move || {
            let retriever = ctx.plain_retriever();
            let retriever = if gloss {
                retriever.with_glosses(ctx.generator())
            } else {
                retriever
            };
            retriever.retrieve(&params.query, mentor, limit)
        })
        .await
        .map_err(|e| mcp_error("search task failed", e))?
        .map_err(|e| mcp_error("search failed", e))?;

        let summary = format_search_summary(&hits, &query, mentor);
        let structured = serde_json::to_value(SearchResponse {
            query,
            mentor,
            result_count: hits.len(),
            results: hits,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DivineMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("divine-dialogue", env!("CARGO_PKG_VERSION"))
                    .with_title("Divine Dialogue MCP"),
            )
            .with_instructions(
                "Use divine_dialogue for a full answer from all three mentors, divine_follow_up to continue with one of them, and divine_search to look up verses.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// What to search for.
    pub query: String,
    /// Whose scripture to search: krishna, buddha or jesus.
    pub mentor: Mentor,
    /// Maximum number of verses (default: 3).
    pub limit: Option<usize>,
    /// Generate a one-line explanation per verse (default: false).
    pub gloss: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    mentor: Mentor,
    result_count: usize,
    results: Vec<RetrievalHit>,
}

fn format_search_summary(hits: &[RetrievalHit], query: &str, mentor: Mentor) -> String {
    if hits.is_empty() {
        return format!("No verses from {mentor} found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(hits.len() + 1);
    let suffix = if hits.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} verse{suffix} from {mentor} for \"{query}\":",
        hits.len()
    ));
    for hit in hits {
        lines.push(format!("[{}] {:.3} {}", hit.reference, hit.similarity, hit.text));
    }
    lines.join("\n")
}

fn format_dialogue_summary(outcome: &DialogueOutcome) -> String {
    match outcome {
        DialogueOutcome::Completed(response) => {
            let mut sections: Vec<String> = response
                .mentor_responses
                .iter()
                .map(|turn| {
                    format!(
                        "{} {}:\n{}",
                        turn.mentor.persona().icon,
                        turn.mentor,
                        turn.generated_text
                    )
                })
                .collect();
            sections.push(format!("Synthesis:\n{}", response.synthesis));
            sections.join("\n\n")
        }
        DialogueOutcome::Failed(failure) => {
            format!("{} ({})", failure.synthesis, failure.error)
        }
    }
}

fn format_follow_up_summary(result: &FollowUpResult) -> String {
    format!(
        "{} {}:\n{}",
        result.mentor.persona().icon,
        result.mentor,
        result.generated_text
    )
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(ctx: DialogueContext) -> error::Result<()> {
    // The last handle is dropped outside the runtime; the blocking HTTP
    // client inside must not be dropped on an async thread.
    let ctx = Arc::new(ctx);
    let server = DivineMcpServer::new(Arc::clone(&ctx));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    let served = runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    });

    drop(runtime);
    drop(ctx);
    served
}
